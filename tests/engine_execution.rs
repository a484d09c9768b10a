//! End-to-end tests of the interpreter loop: ordering, branching, stop
//! semantics, failure reporting, and the unconditional cleanup pass.

use parking_lot::Mutex;
use std::sync::Arc;

use baton::{
    ActionProgram, CmdResult, CommandConfig, CommandDescriptor, CommandError, CommandTarget,
    Engine, EngineConfig, EngineError, ErrorPolicy, EventEnvelope, ExecCtx, ExecOutcome,
    GlobalVars, InMemoryFieldProxy, InvokeContext, NullEventStore, NullMacroLoader, ParamKind,
    ProgramBuilder, RunContext, TargetId, Value,
};

/// Extra target that records which steps executed and counts lifecycle
/// calls; `Boom` panics, `Fail` errors.
#[derive(Default)]
struct Probe {
    executed: Vec<usize>,
    initialized: usize,
    cleaned: usize,
}

struct ProbeTarget {
    probe: Arc<Mutex<Probe>>,
}

impl CommandTarget for ProbeTarget {
    fn target_id(&self) -> TargetId {
        100
    }

    fn name(&self) -> &str {
        "Probe"
    }

    fn enumerate_commands(&self, _context: InvokeContext) -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::new("Mark", false),
            CommandDescriptor::new("Fail", false),
            CommandDescriptor::new("Boom", false),
        ]
    }

    fn initialize(&mut self, _run: &RunContext) -> Result<(), CommandError> {
        self.probe.lock().initialized += 1;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), CommandError> {
        self.probe.lock().cleaned += 1;
        Ok(())
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> Result<ExecOutcome, CommandError> {
        match config.command.as_str() {
            "Mark" => {
                self.probe.lock().executed.push(ctx.step);
                Ok(ExecOutcome::ok())
            }
            "Fail" => Err(CommandError::BadParameter {
                index: 0,
                detail: "asked to fail".to_string(),
            }),
            "Boom" => panic!("probe asked to panic"),
            other => Err(CommandError::UnknownCommand {
                target: "Probe".to_string(),
                command: other.to_string(),
            }),
        }
    }
}

struct Fixture {
    engine: Engine,
    fields: Arc<InMemoryFieldProxy>,
    globals: GlobalVars,
    probe: Arc<Mutex<Probe>>,
}

fn fixture() -> Fixture {
    let fields = Arc::new(InMemoryFieldProxy::new());
    fields.set("Thermo", "Temp", Value::Card(75));
    fields.set("Thermo", "Setpoint", Value::Card(70));
    let globals = GlobalVars::new();
    let mut engine = Engine::new(
        EngineConfig {
            wait_slice_ms: 10,
            error_policy: ErrorPolicy::Rethrow,
        },
        fields.clone(),
        Box::new(NullMacroLoader),
        Box::new(NullEventStore),
        globals.clone(),
    );
    let probe = Arc::new(Mutex::new(Probe::default()));
    engine
        .add_target(Box::new(ProbeTarget {
            probe: probe.clone(),
        }))
        .unwrap();
    Fixture {
        engine,
        fields,
        globals,
        probe,
    }
}

fn mark() -> CommandConfig {
    CommandConfig::new("Probe", "Mark")
}

fn write_setpoint(value: &str) -> CommandConfig {
    CommandConfig::new("Fields", "WriteField")
        .arg("Thermo.Setpoint", ParamKind::FieldName)
        .arg(value, ParamKind::Text)
}

fn thermostat_program() -> ActionProgram {
    ProgramBuilder::new("thermostat")
        .begin_if(
            CommandConfig::new("Fields", "FieldGreaterThan")
                .arg("Thermo.Temp", ParamKind::FieldName)
                .arg("72", ParamKind::Text),
        )
        .cmd(write_setpoint("68"))
        .begin_else()
        .cmd(write_setpoint("74"))
        .end_if()
        .build()
        .unwrap()
}

#[test]
fn hot_room_takes_only_the_then_branch() {
    let mut fx = fixture();
    let mut program = thermostat_program();
    fx.engine.prepare(&mut program).unwrap();
    let report = fx.engine.run(&program, None).unwrap();
    assert_eq!(report.result, CmdResult::Ok);
    assert_eq!(fx.fields.get("Thermo", "Setpoint"), Some(Value::Card(68)));
}

#[test]
fn cool_room_takes_only_the_else_branch() {
    let mut fx = fixture();
    fx.fields.set("Thermo", "Temp", Value::Card(70));
    let mut program = thermostat_program();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();
    assert_eq!(fx.fields.get("Thermo", "Setpoint"), Some(Value::Card(74)));
}

#[test]
fn straight_line_program_executes_each_enabled_step_once_in_order() {
    let mut fx = fixture();
    let mut program = ProgramBuilder::new("linear")
        .cmd(mark())
        .comment("annotation only")
        .cmd(mark())
        .cmd(mark())
        .disabled()
        .cmd(mark())
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();
    // Steps 0, 2 and 4 ran; 1 is a comment and 3 is disabled.
    assert_eq!(fx.probe.lock().executed, vec![0, 2, 4]);
}

#[test]
fn false_condition_skips_the_region_without_reevaluating() {
    let mut fx = fixture();
    fx.fields.set("Thermo", "Temp", Value::Card(60));
    let mut program = ProgramBuilder::new("skip")
        .begin_if(
            CommandConfig::new("Fields", "FieldGreaterThan")
                .arg("Thermo.Temp", ParamKind::FieldName)
                .arg("72", ParamKind::Text),
        )
        .cmd(mark())
        .cmd(mark())
        .end_if()
        .cmd(mark())
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();
    // Execution resumes past the landing End, at the trailing Mark.
    assert_eq!(fx.probe.lock().executed, vec![4]);
}

#[test]
fn negate_flips_the_branch_but_not_the_result_variable() {
    let mut fx = fixture();
    let mut program = ProgramBuilder::new("negate")
        .begin_if_not(
            CommandConfig::new("System", "EvaluateExpr")
                .arg("(1 == 1)", ParamKind::Expression)
                .arg("global:verdict", ParamKind::VarName),
        )
        .cmd(mark())
        .end_if()
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();
    // The branch was skipped (condition true, negated)...
    assert!(fx.probe.lock().executed.is_empty());
    // ...but the variable holds the un-negated expression result.
    assert_eq!(fx.globals.get("verdict"), Some(Value::Boolean(true)));
}

#[test]
fn stop_runs_no_further_opcodes_but_cleanup_still_happens() {
    let mut fx = fixture();
    let mut program = ProgramBuilder::new("stopper")
        .cmd(mark())
        .cmd(CommandConfig::new("System", "Stop"))
        .cmd(mark())
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    let report = fx.engine.run(&program, None).unwrap();
    assert_eq!(report.result, CmdResult::Stop);
    assert!(report.success());
    let probe = fx.probe.lock();
    assert_eq!(probe.executed, vec![0]);
    assert_eq!(probe.initialized, 1);
    assert_eq!(probe.cleaned, 1);
}

#[test]
fn command_failure_reports_step_and_error_and_cleans_up() {
    let mut fx = fixture();
    let mut program = ProgramBuilder::new("failing")
        .cmd(mark())
        .cmd(CommandConfig::new("Probe", "Fail"))
        .cmd(mark())
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();

    let err = fx.engine.run(&program, None).unwrap_err();
    match &err {
        EngineError::Command { step, .. } => assert_eq!(*step, 1),
        other => panic!("expected command error, got {:?}", other),
    }
    let probe = fx.probe.lock();
    assert_eq!(probe.executed, vec![0]);
    assert_eq!(probe.cleaned, 1);
}

#[test]
fn report_policy_folds_the_error_into_the_report() {
    let fields = Arc::new(InMemoryFieldProxy::new());
    let mut engine = Engine::new(
        EngineConfig {
            wait_slice_ms: 10,
            error_policy: ErrorPolicy::Report,
        },
        fields,
        Box::new(NullMacroLoader),
        Box::new(NullEventStore),
        GlobalVars::new(),
    );
    let probe = Arc::new(Mutex::new(Probe::default()));
    engine
        .add_target(Box::new(ProbeTarget {
            probe: probe.clone(),
        }))
        .unwrap();

    let mut program = ProgramBuilder::new("failing")
        .cmd(CommandConfig::new("Probe", "Fail"))
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();
    let report = engine.run(&program, None).unwrap();
    assert_eq!(report.result, CmdResult::Except);
    assert_eq!(report.failed_step, Some(0));
    assert!(report.error.unwrap().contains("asked to fail"));
}

#[test]
fn panic_in_a_target_is_classified_unknown_except() {
    let fields = Arc::new(InMemoryFieldProxy::new());
    let mut engine = Engine::new(
        EngineConfig {
            wait_slice_ms: 10,
            error_policy: ErrorPolicy::Report,
        },
        fields,
        Box::new(NullMacroLoader),
        Box::new(NullEventStore),
        GlobalVars::new(),
    );
    let probe = Arc::new(Mutex::new(Probe::default()));
    engine
        .add_target(Box::new(ProbeTarget {
            probe: probe.clone(),
        }))
        .unwrap();

    let mut program = ProgramBuilder::new("panicking")
        .cmd(CommandConfig::new("Probe", "Boom"))
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();
    let report = engine.run(&program, None).unwrap();
    assert_eq!(report.result, CmdResult::UnknownExcept);
    assert_eq!(report.failed_step, Some(0));
    // Cleanup still ran after the panic was caught.
    assert_eq!(probe.lock().cleaned, 1);
}

#[test]
fn unprepared_program_is_a_fatal_configuration_error() {
    let mut fx = fixture();
    let program = ProgramBuilder::new("raw").cmd(mark()).build().unwrap();
    let err = fx.engine.run(&program, None).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn extras_are_flushed_per_invocation() {
    let mut fx = fixture();
    let mut program = ProgramBuilder::new("probe-only").cmd(mark()).build().unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();

    // The probe was flushed at the end of the run; its id no longer
    // resolves, which is fatal, and the built-ins are untouched.
    let err = fx.engine.run(&program, None).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    fx.engine
        .add_target(Box::new(ProbeTarget {
            probe: fx.probe.clone(),
        }))
        .unwrap();
    fx.engine.run(&program, None).unwrap();
    assert_eq!(fx.probe.lock().executed, vec![0, 0]);
}

#[test]
fn triggered_event_envelope_drives_extraction_commands() {
    let mut fx = fixture();
    let envelope = EventEnvelope::new("motion")
        .with("type", "start")
        .with("sensornum", "7")
        .with("name", "porch")
        .with("evid", "ev-9");
    let mut program = ProgramBuilder::new("on-motion")
        .begin_if(
            CommandConfig::new("TrigEvent", "IsMotionEv")
                .arg("global:mtype", ParamKind::VarName)
                .arg("global:mnum", ParamKind::VarName)
                .arg("global:mname", ParamKind::VarName),
        )
        .cmd(mark())
        .end_if()
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, Some(&envelope)).unwrap();

    assert_eq!(fx.probe.lock().executed, vec![1]);
    assert_eq!(fx.globals.get("mtype"), Some(Value::from("start")));
    assert_eq!(fx.globals.get("mnum"), Some(Value::from("7")));
    assert_eq!(fx.globals.get("mname"), Some(Value::from("porch")));

    // A second run without an envelope answers false.
    fx.engine
        .add_target(Box::new(ProbeTarget {
            probe: fx.probe.clone(),
        }))
        .unwrap();
    fx.engine.run(&program, None).unwrap();
    assert_eq!(fx.probe.lock().executed, vec![1]);
}

#[test]
fn token_expansion_reads_live_state_per_step() {
    let mut fx = fixture();
    fx.globals.set("room", Value::from("Thermo"));
    let mut program = ProgramBuilder::new("tokens")
        .cmd(
            CommandConfig::new("Fields", "WriteField")
                .arg("%(global:room).Setpoint", ParamKind::FieldName)
                .arg("$(Thermo.Temp)", ParamKind::Text),
        )
        .build()
        .unwrap();
    fx.engine.prepare(&mut program).unwrap();
    fx.engine.run(&program, None).unwrap();
    assert_eq!(fx.fields.get("Thermo", "Setpoint"), Some(Value::Card(75)));
}

#[test]
fn parameter_check_surfaces_validation_rejects() {
    let fx = fixture();
    let program = ProgramBuilder::new("bad-params")
        .cmd(
            CommandConfig::new("System", "EvaluateExpr")
                .arg("(1 ==", ParamKind::Expression)
                .arg("local:out", ParamKind::VarName),
        )
        .cmd(
            CommandConfig::new("EventServer", "SetPerEvTime")
                .arg("/per/lawn", ParamKind::Text)
                .arg("weekly", ParamKind::Text)
                .arg("255", ParamKind::Number)
                .arg("0", ParamKind::Number),
        )
        .build()
        .unwrap();
    let issues = fx.engine.check_parameters(&program);
    assert_eq!(issues.len(), 2);
    assert_eq!((issues[0].step, issues[0].param), (0, 0));
    assert_eq!((issues[1].step, issues[1].param), (1, 2));
}
