//! Tests of the background invocation adapter: identical results to a
//! foreground run, tracer thread affinity, and cooperative shutdown.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use uuid::Uuid;

use baton::{
    BackgroundRun, CmdResult, CommandConfig, Engine, EngineConfig, ErrorPolicy, GlobalVars,
    InMemoryFieldProxy, NullEventStore, NullMacroLoader, ParamKind, ProgramBuilder, Tracer, Value,
};

/// Tracer that records which thread each callback fired on.
#[derive(Default)]
struct ThreadTracer {
    events: Mutex<Vec<(String, ThreadId)>>,
}

impl ThreadTracer {
    fn events(&self) -> Vec<(String, ThreadId)> {
        self.events.lock().clone()
    }
}

impl Tracer for ThreadTracer {
    fn run_started(&self, _run_id: Uuid) {
        self.events
            .lock()
            .push(("start".to_string(), std::thread::current().id()));
    }

    fn step(&self, index: usize, _command: &str) {
        self.events
            .lock()
            .push((format!("step:{}", index), std::thread::current().id()));
    }

    fn run_ended(&self, _run_id: Uuid, success: bool) {
        self.events
            .lock()
            .push((format!("end:{}", success), std::thread::current().id()));
    }
}

fn engine_with_tracer(tracer: Arc<ThreadTracer>) -> (Engine, Arc<InMemoryFieldProxy>) {
    let fields = Arc::new(InMemoryFieldProxy::new());
    fields.set("Lamp", "State", Value::from("off"));
    let engine = Engine::new(
        EngineConfig {
            wait_slice_ms: 10,
            error_policy: ErrorPolicy::Rethrow,
        },
        fields.clone(),
        Box::new(NullMacroLoader),
        Box::new(NullEventStore),
        GlobalVars::new(),
    )
    .with_tracer(tracer);
    (engine, fields)
}

#[test]
fn background_run_matches_a_foreground_run() {
    let tracer = Arc::new(ThreadTracer::default());
    let (engine, fields) = engine_with_tracer(tracer);
    let mut program = ProgramBuilder::new("flip")
        .cmd(
            CommandConfig::new("Fields", "WriteField")
                .arg("Lamp.State", ParamKind::FieldName)
                .arg("on", ParamKind::Text),
        )
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();

    let run = BackgroundRun::spawn(engine, Arc::new(program), None);
    let (_engine, result) = run.wait();
    let report = result.unwrap();
    assert_eq!(report.result, CmdResult::Ok);
    assert_eq!(fields.get("Lamp", "State"), Some(Value::from("on")));
}

#[test]
fn tracer_start_end_fire_on_the_caller_thread_steps_on_the_worker() {
    let tracer = Arc::new(ThreadTracer::default());
    let (engine, _fields) = engine_with_tracer(tracer.clone());
    let mut program = ProgramBuilder::new("two-steps")
        .cmd(
            CommandConfig::new("System", "Equals")
                .arg("1", ParamKind::Text)
                .arg("1", ParamKind::Text),
        )
        .cmd(
            CommandConfig::new("System", "Equals")
                .arg("2", ParamKind::Text)
                .arg("2", ParamKind::Text),
        )
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();

    let caller = std::thread::current().id();
    let run = BackgroundRun::spawn(engine, Arc::new(program), None);
    while !run.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let (_engine, result) = run.wait();
    result.unwrap();

    let events = tracer.events();
    assert_eq!(events.first().unwrap().0, "start");
    assert_eq!(events.first().unwrap().1, caller);
    assert_eq!(events.last().unwrap().0, "end:true");
    assert_eq!(events.last().unwrap().1, caller);
    let steps: Vec<&(String, ThreadId)> = events
        .iter()
        .filter(|(name, _)| name.starts_with("step:"))
        .collect();
    assert_eq!(steps.len(), 2);
    for (_, thread) in steps {
        assert_ne!(*thread, caller);
    }
}

#[test]
fn shutdown_interrupts_a_waiting_background_run() {
    let tracer = Arc::new(ThreadTracer::default());
    let (engine, fields) = engine_with_tracer(tracer);
    let mut program = ProgramBuilder::new("long-pause")
        .cmd(CommandConfig::new("System", "Pause").arg("60000", ParamKind::Number))
        .cmd(
            CommandConfig::new("Fields", "WriteField")
                .arg("Lamp.State", ParamKind::FieldName)
                .arg("on", ParamKind::Text),
        )
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();
    let shutdown = engine.shutdown_flag();

    let run = BackgroundRun::spawn(engine, Arc::new(program), None);
    std::thread::sleep(Duration::from_millis(30));
    shutdown.request();
    let (_engine, result) = run.wait();
    let report = result.unwrap();
    // The pause observed the flag and stopped the program; the write after
    // it never ran.
    assert_eq!(report.result, CmdResult::Stop);
    assert_eq!(fields.get("Lamp", "State"), Some(Value::from("off")));
}

#[test]
fn poll_flag_flips_exactly_when_the_worker_finishes() {
    let tracer = Arc::new(ThreadTracer::default());
    let (engine, _fields) = engine_with_tracer(tracer);
    let mut program = ProgramBuilder::new("short-pause")
        .cmd(CommandConfig::new("System", "Pause").arg("50", ParamKind::Number))
        .build()
        .unwrap();
    engine.prepare(&mut program).unwrap();

    let run = BackgroundRun::spawn(engine, Arc::new(program), None);
    assert!(!run.is_finished());
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !run.is_finished() {
        assert!(std::time::Instant::now() < deadline, "worker never finished");
        std::thread::sleep(Duration::from_millis(5));
    }
    let (_engine, result) = run.wait();
    assert_eq!(result.unwrap().result, CmdResult::Ok);
}
