//! The execution engine: resolves opcode targets, expands per-step
//! parameters, dispatches to command targets, interprets control flow, and
//! manages per-run lifecycle across all targets.
//!
//! The interpreter is a state machine over the instruction pointer: flat
//! index stepping with relative jumps, no recursion. A single engine
//! instance processes at most one action at a time (enforced by `&mut self`);
//! concurrent actions need separate engine instances sharing only the global
//! variable scope.

/// Background invocation adapter.
pub mod background;
/// Error taxonomy.
pub mod error;
/// Opcode stream, command configs, and the program builder.
pub mod program;
/// Run tracing.
pub mod trace;
/// Variable scopes.
pub mod vars;

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use self::error::{CommandError, ConfigError, ConfigResult, EngineError, EngineResult, ValidationError};
use self::program::{ActionProgram, CommandConfig, Opcode, expand_config};
use self::trace::{NullTracer, Tracer};
use self::vars::{GlobalVars, LocalVars, VarScopes};
use crate::host::{EventStore, FieldProxy, MacroLoader, ShutdownFlag};
use crate::target::{
    CmdResult, CommandDescriptor, CommandTarget, EventEnvelope, EventServerTarget, ExecCtx,
    ExecOutcome, FieldTarget, InvokeContext, MacroTarget, RunContext, SystemTarget, TargetId,
    TargetRegistry, TriggerTarget,
};

/// How the engine disposes of an execution error caught at the loop
/// boundary. Validation and configuration errors are unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Return the error to the caller (the default).
    Rethrow,
    /// Fold the error into the [`RunReport`] and return `Ok`.
    Report,
}

/// Configuration for an engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Granularity of interruptible sleeps in wait commands, in
    /// milliseconds. The shutdown flag is re-checked once per slice.
    pub wait_slice_ms: u64,

    /// Disposition of caught execution errors.
    pub error_policy: ErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_slice_ms: 100,
            error_policy: ErrorPolicy::Rethrow,
        }
    }
}

/// Terminal report of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal result of the run.
    pub result: CmdResult,
    /// Index of the failing opcode, when the run failed.
    pub failed_step: Option<usize>,
    /// Rendered error detail, when the run failed.
    pub error: Option<String>,
}

impl RunReport {
    /// Whether the run ended without error (`Ok` and intentional `Stop`
    /// both count as success).
    pub fn success(&self) -> bool {
        matches!(self.result, CmdResult::Ok | CmdResult::Stop)
    }
}

/// One parameter rejected by [`Engine::check_parameters`].
#[derive(Debug, Clone)]
pub struct ParamIssue {
    /// Step index of the offending command.
    pub step: usize,
    /// Parameter slot within the command.
    pub param: usize,
    /// What the target objected to.
    pub error: ValidationError,
}

/// How the interpreter loop ended, before policy is applied.
enum LoopEnd {
    Done(CmdResult),
    Failed { step: usize, error: CommandError },
    Panicked { step: usize, detail: String },
    Fatal(ConfigError),
}

/// The action interpreter engine.
pub struct Engine {
    config: EngineConfig,
    registry: TargetRegistry,
    globals: GlobalVars,
    fields: Arc<dyn FieldProxy>,
    tracer: Arc<dyn Tracer>,
    shutdown: ShutdownFlag,
}

impl Engine {
    /// Build an engine over the host's collaborators. The five built-in
    /// targets are constructed here; extras can be added per run with
    /// [`Engine::add_target`].
    pub fn new(
        config: EngineConfig,
        fields: Arc<dyn FieldProxy>,
        macros: Box<dyn MacroLoader>,
        events: Box<dyn EventStore>,
        globals: GlobalVars,
    ) -> Self {
        let builtins: Vec<Box<dyn CommandTarget>> = vec![
            Box::new(FieldTarget::new(fields.clone())),
            Box::new(MacroTarget::new(macros)),
            Box::new(SystemTarget::new(fields.clone())),
            Box::new(EventServerTarget::new(events)),
            Box::new(TriggerTarget::new()),
        ];
        Self {
            config,
            registry: TargetRegistry::from_builtins(builtins),
            globals,
            fields,
            tracer: Arc::new(NullTracer),
            shutdown: ShutdownFlag::new(),
        }
    }

    /// Attach a tracer (builder style).
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// The engine's shutdown flag; request it to interrupt wait commands.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Handle to the shared global scope.
    pub fn globals(&self) -> GlobalVars {
        self.globals.clone()
    }

    /// The attached tracer.
    pub fn tracer(&self) -> Arc<dyn Tracer> {
        self.tracer.clone()
    }

    /// Add a host-supplied extra target for the next run. Extras are
    /// flushed when the run completes and must be re-added per invocation.
    pub fn add_target(&mut self, target: Box<dyn CommandTarget>) -> ConfigResult<TargetId> {
        self.registry.add_extra(target)
    }

    /// Resolve a program's target names against the live registry and check
    /// its branch invariants. Must run before [`Engine::run`], after any
    /// extra targets are added.
    pub fn prepare(&self, program: &mut ActionProgram) -> ConfigResult<()> {
        program.validate()?;
        let registry = &self.registry;
        program.resolve_targets(|name| registry.resolve(name))
    }

    /// Ask each command's target to validate every parameter, collecting
    /// the rejects. Authoring-time; nothing is executed.
    pub fn check_parameters(&self, program: &ActionProgram) -> Vec<ParamIssue> {
        let mut issues = Vec::new();
        for (step, entry) in program.steps.iter().enumerate() {
            let config = match &entry.op {
                Opcode::If { config, .. } | Opcode::Cmd { config } => config,
                _ => continue,
            };
            let Some(target) = self
                .registry
                .resolve(&config.target_name)
                .and_then(|id| self.registry.get(id))
            else {
                issues.push(ParamIssue {
                    step,
                    param: 0,
                    error: ValidationError::new(format!(
                        "unknown target '{}'",
                        config.target_name
                    )),
                });
                continue;
            };
            for (param, slot) in config.params.iter().enumerate() {
                if let Err(error) =
                    target.validate_parameter(&config.command, config, param, &slot.value)
                {
                    issues.push(ParamIssue { step, param, error });
                }
            }
        }
        issues
    }

    /// The live command catalog, per target, for the given context.
    pub fn catalog(&self, context: InvokeContext) -> Vec<(String, Vec<CommandDescriptor>)> {
        self.registry
            .iter()
            .map(|t| (t.name().to_string(), t.enumerate_commands(context)))
            .collect()
    }

    /// Run a prepared program to completion on the calling thread.
    ///
    /// Execution errors are disposed of per [`ErrorPolicy`]; configuration
    /// errors are always returned. The cleanup pass runs in every case once
    /// initialization has begun.
    pub fn run(
        &mut self,
        program: &ActionProgram,
        event: Option<&EventEnvelope>,
    ) -> EngineResult<RunReport> {
        self.run_with_id(program, event, Uuid::new_v4(), true)
    }

    /// Run with a caller-chosen run id. `announce` controls whether the
    /// tracer's start/end callbacks fire here; the background adapter fires
    /// them on the caller's thread instead.
    pub(crate) fn run_with_id(
        &mut self,
        program: &ActionProgram,
        event: Option<&EventEnvelope>,
        run_id: Uuid,
        announce: bool,
    ) -> EngineResult<RunReport> {
        // Fatal checks first; no cleanup is owed before initialization.
        program.validate()?;
        for (step, entry) in program.steps.iter().enumerate() {
            if let Opcode::If { config, .. } | Opcode::Cmd { config } = &entry.op {
                if config.target_id.is_none() {
                    return Err(ConfigError::NotPrepared(step).into());
                }
            }
        }

        let run_ctx = RunContext {
            run_id,
            event_id: event.and_then(|e| e.event_id()).map(str::to_string),
        };
        for target in self.registry.iter_mut() {
            target.set_event(event);
        }
        if announce {
            self.tracer.run_started(run_id);
        }
        tracing::debug!(run = %run_id, program = %program.name, "action run starting");

        let mut locals = LocalVars::new();
        let mut end = None;
        for target in self.registry.iter_mut() {
            if let Err(error) = target.initialize(&run_ctx) {
                end = Some(LoopEnd::Failed { step: 0, error });
                break;
            }
        }
        let end = match end {
            Some(early) => early,
            None => self.exec_loop(program, &run_ctx, &mut locals),
        };

        // Cleanup pass: every target, unconditionally; failures are logged
        // and never change the run's outcome.
        for target in self.registry.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| target.cleanup())) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(target_name = target.name(), error = %error, "cleanup failed");
                }
                Err(_) => {
                    tracing::warn!(target_name = target.name(), "cleanup panicked");
                }
            }
        }
        for target in self.registry.iter_mut() {
            target.set_event(None);
        }
        self.registry.flush_extras();

        let (report, error) = match end {
            LoopEnd::Done(result) => (
                RunReport {
                    result,
                    failed_step: None,
                    error: None,
                },
                None,
            ),
            LoopEnd::Failed { step, error } => (
                RunReport {
                    result: CmdResult::Except,
                    failed_step: Some(step),
                    error: Some(error.to_string()),
                },
                Some(EngineError::Command {
                    step,
                    source: error,
                }),
            ),
            LoopEnd::Panicked { step, detail } => (
                RunReport {
                    result: CmdResult::UnknownExcept,
                    failed_step: Some(step),
                    error: Some(detail.clone()),
                },
                Some(EngineError::Panic { step, detail }),
            ),
            LoopEnd::Fatal(config_err) => {
                if announce {
                    self.tracer.run_ended(run_id, false);
                }
                return Err(config_err.into());
            }
        };

        if announce {
            self.tracer.run_ended(run_id, report.success());
        }
        tracing::debug!(run = %run_id, result = ?report.result, "action run finished");

        match error {
            Some(err) if self.config.error_policy == ErrorPolicy::Rethrow => Err(err),
            _ => Ok(report),
        }
    }

    /// The interpreter loop proper: flat ip stepping over the opcode stream.
    fn exec_loop(
        &mut self,
        program: &ActionProgram,
        run_ctx: &RunContext,
        locals: &mut LocalVars,
    ) -> LoopEnd {
        let mut ip = 0usize;
        while ip < program.steps.len() {
            let entry = &program.steps[ip];
            if entry.disabled {
                ip += 1;
                continue;
            }
            match &entry.op {
                Opcode::Comment(_) | Opcode::End => {
                    ip += 1;
                }
                Opcode::Else { jump } => {
                    // Unconditional jump to the matching End (a no-op pad).
                    ip = (ip as i64 + *jump as i64) as usize;
                }
                Opcode::If {
                    jump,
                    negate,
                    config,
                } => {
                    let outcome = match self.dispatch(config, ip, run_ctx, locals) {
                        Ok(outcome) => outcome,
                        Err(end) => return end,
                    };
                    if outcome.result == CmdResult::Stop {
                        return LoopEnd::Done(CmdResult::Stop);
                    }
                    // The negate flag flips only the branch decision.
                    if outcome.conditional ^ negate {
                        ip += 1;
                    } else {
                        ip = (ip as i64 + *jump as i64) as usize + 1;
                    }
                }
                Opcode::Cmd { config } => {
                    let outcome = match self.dispatch(config, ip, run_ctx, locals) {
                        Ok(outcome) => outcome,
                        Err(end) => return end,
                    };
                    if outcome.result == CmdResult::Stop {
                        return LoopEnd::Done(CmdResult::Stop);
                    }
                    ip += 1;
                }
            }
        }
        LoopEnd::Done(CmdResult::Ok)
    }

    /// Expand one step's parameters on a working copy, resolve its target,
    /// and invoke it, converting caught panics and errors to a loop ending.
    fn dispatch(
        &mut self,
        config: &CommandConfig,
        ip: usize,
        run_ctx: &RunContext,
        locals: &mut LocalVars,
    ) -> Result<ExecOutcome, LoopEnd> {
        let tracer = self.tracer.clone();
        let fields = self.fields.clone();
        let globals = self.globals.clone();
        let shutdown = self.shutdown.clone();
        let wait_slice = Duration::from_millis(self.config.wait_slice_ms);

        let expanded = {
            let vars = VarScopes::new(locals, &globals, tracer.as_ref());
            expand_config(config, &vars, fields.as_ref())
                .map_err(|error| LoopEnd::Failed { step: ip, error })?
        };
        tracer.step(ip, &expanded.display());

        let Some(id) = config.target_id else {
            return Err(LoopEnd::Fatal(ConfigError::NotPrepared(ip)));
        };
        let Some(target) = self.registry.get_mut(id) else {
            return Err(LoopEnd::Fatal(ConfigError::UnknownTarget(id)));
        };

        let mut ctx = ExecCtx {
            step: ip,
            run: run_ctx,
            vars: VarScopes::new(locals, &globals, tracer.as_ref()),
            tracer: tracer.as_ref(),
            shutdown: &shutdown,
            wait_slice,
        };
        match catch_unwind(AssertUnwindSafe(|| target.execute(&expanded, &mut ctx))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(error)) => Err(LoopEnd::Failed { step: ip, error }),
            Err(payload) => Err(LoopEnd::Panicked {
                step: ip,
                detail: panic_detail(payload),
            }),
        }
    }
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
