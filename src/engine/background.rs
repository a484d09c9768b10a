//! Background invocation adapter.
//!
//! Runs the identical synchronous engine loop on a dedicated worker thread
//! so a GUI caller can keep pumping its message loop while the action runs.
//! The caller polls [`BackgroundRun::is_finished`] or blocks on
//! [`BackgroundRun::wait`]. The tracer's start/end callbacks fire on the
//! caller's thread; per-step callbacks fire on the worker's thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use uuid::Uuid;

use super::error::EngineResult;
use super::program::ActionProgram;
use super::{Engine, RunReport};
use crate::target::EventEnvelope;

/// A running background invocation. Dropping it without calling `wait`
/// detaches the worker; the run completes on its own.
pub struct BackgroundRun {
    handle: JoinHandle<(Engine, EngineResult<RunReport>)>,
    finished: Arc<AtomicBool>,
    run_id: Uuid,
}

impl BackgroundRun {
    /// Start a run on a dedicated worker thread. Takes the engine by value
    /// (one engine runs at most one action at a time); `wait` hands it
    /// back.
    pub fn spawn(
        mut engine: Engine,
        program: Arc<ActionProgram>,
        event: Option<EventEnvelope>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        let finished = Arc::new(AtomicBool::new(false));

        // Start callback on the caller's thread, before the worker exists.
        engine.tracer().run_started(run_id);

        let worker_finished = finished.clone();
        let handle = std::thread::spawn(move || {
            let result = engine.run_with_id(&program, event.as_ref(), run_id, false);
            worker_finished.store(true, Ordering::SeqCst);
            (engine, result)
        });

        Self {
            handle,
            finished,
            run_id,
        }
    }

    /// Id of this run, as reported to the tracer.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the worker has finished. Never blocks.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Block until the run completes, firing the tracer's end callback on
    /// this (the caller's) thread, and hand the engine back with the
    /// result.
    pub fn wait(self) -> (Engine, EngineResult<RunReport>) {
        let (engine, result) = match self.handle.join() {
            Ok(pair) => pair,
            Err(payload) => std::panic::resume_unwind(payload),
        };
        let success = match &result {
            Ok(report) => report.success(),
            Err(_) => false,
        };
        engine.tracer().run_ended(self.run_id, success);
        (engine, result)
    }
}
