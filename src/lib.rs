//! Baton – the action interpreter engine of a home-control platform
//!
//! Baton interprets user-authored, data-driven actions (ordered opcode
//! lists with conditional branching) against a set of pluggable command
//! targets:
//! - A flat opcode stream (`Comment`/`Cmd`/`If`/`Else`/`End`) with
//!   relative-index jumps, compiled once and reused across invocations
//! - Five built-in command targets (fields, macros, system utilities,
//!   event-server mutation, triggered-event extraction) plus host extras
//! - Two variable scopes: per-invocation local and caller-owned shared global
//! - An embedded boolean/comparison expression sub-language with its own
//!   tokenizer, recursive-descent parser, and typed evaluator
//! - A background adapter that runs the engine on a worker thread while the
//!   caller keeps its message loop alive
//!
//! The engine is a library: the host owns transport, persistence, and UI,
//! and reaches the engine through the narrow traits in [`host`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Execution engine, opcode stream, variables, tracing, and errors.
pub mod engine;
/// Embedded expression sub-language.
pub mod expr;
/// Narrow interfaces to the host's collaborators.
pub mod host;
/// Command targets and the dispatch protocol.
pub mod target;
/// Typed scalar values and coercion.
pub mod value;

// Re-export key types for convenience
pub use engine::background::BackgroundRun;
pub use engine::error::{CommandError, ConfigError, EngineError, EngineResult, ValidationError};
pub use engine::program::{
    ActionProgram, CmdParam, CommandConfig, Opcode, ParamKind, ProgramBuilder, Step,
};
pub use engine::trace::{NullTracer, Tracer};
pub use engine::vars::{GlobalVars, LocalVars, VarScopes};
pub use engine::{Engine, EngineConfig, ErrorPolicy, RunReport};
pub use host::{
    DriverState, EventStore, FieldProxy, InMemoryFieldProxy, LoadedMacro, MacroLoader, MacroParam,
    NullEventStore, NullMacroLoader, ParamDir, ShutdownFlag, WaitMode,
};
pub use target::{
    CmdResult, CommandDescriptor, CommandTarget, EventEnvelope, ExecCtx, ExecOutcome,
    InvokeContext, RunContext, TargetId, TargetRegistry,
};
pub use value::{Value, ValueKind};

/// Current version of the Baton engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
