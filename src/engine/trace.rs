//! Observational tracing of a run.
//!
//! A host may supply a [`Tracer`] to watch a run: start/end, each expanded
//! command about to execute, each variable write, and the expanded text of
//! each evaluated expression. Tracers are purely observational and can never
//! alter control flow.

use uuid::Uuid;

use crate::value::Value;

/// Callbacks a host can implement to observe a run.
///
/// All methods default to no-ops so implementations only override what they
/// care about. Tracers must be `Send + Sync`: with the background adapter the
/// start/end callbacks fire on the caller's thread while per-step callbacks
/// fire on the worker's thread.
pub trait Tracer: Send + Sync {
    /// A run is about to start.
    fn run_started(&self, run_id: Uuid) {
        let _ = run_id;
    }

    /// An expanded command is about to execute at `index`.
    fn step(&self, index: usize, command: &str) {
        let _ = (index, command);
    }

    /// A variable was written. `name` carries its scope prefix.
    fn var_written(&self, name: &str, value: &Value) {
        let _ = (name, value);
    }

    /// An expression was evaluated; `expanded` is its textual form with
    /// resolved values substituted.
    fn expression(&self, expanded: &str) {
        let _ = expanded;
    }

    /// The run finished. `success` is false for Except/UnknownExcept ends.
    fn run_ended(&self, run_id: Uuid, success: bool) {
        let _ = (run_id, success);
    }
}

/// Tracer that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTracer;

impl Tracer for NullTracer {}
