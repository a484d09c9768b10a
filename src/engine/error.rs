//! Error types for the action engine.
//!
//! One enum per concern, with conversions at the boundaries: validation
//! errors are returned (never thrown) so authoring tools can report them
//! inline; command errors are caught once at the interpreter-loop boundary
//! and classified; configuration errors are fatal and never retried.

use thiserror::Error;

use super::vars::VarError;
use crate::expr::ExprError;
use crate::target::TargetId;
use crate::value::ConvertError;

/// Fatal program/registry configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A command names a target that is not in the registry.
    #[error("target '{0}' is not registered")]
    UnresolvedTarget(String),

    /// A command carries a target id no live target answers to.
    #[error("no target with id {0}")]
    UnknownTarget(TargetId),

    /// A command's target id was never resolved against a registry.
    #[error("step {0}: target id not resolved; call Engine::prepare first")]
    NotPrepared(usize),

    /// An `If`/`Else` jump offset does not land on a legal opcode.
    #[error("step {index}: {detail}")]
    BadJump {
        /// Index of the offending opcode.
        index: usize,
        /// What the jump violated.
        detail: String,
    },

    /// Control-flow opcodes are unbalanced.
    #[error("unbalanced control flow: {0}")]
    Unbalanced(String),

    /// An extra target collides with an existing id or the reserved range.
    #[error("target id {0} is already taken or reserved")]
    DuplicateTarget(TargetId),
}

/// Convenience result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A parameter rejected at authoring time. Returned, never thrown.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    /// Build a validation error from any displayable detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Errors raised by an executing command, caught at the loop boundary.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A parameter was missing or malformed at execution time.
    #[error("parameter {index}: {detail}")]
    BadParameter {
        /// Zero-based parameter slot.
        index: usize,
        /// What was wrong with it.
        detail: String,
    },

    /// The target does not offer the named command.
    #[error("target '{target}' has no command '{command}'")]
    UnknownCommand {
        /// Target name.
        target: String,
        /// Command name.
        command: String,
    },

    /// A value could not be converted to the kind a command requires.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// A variable lookup failed.
    #[error(transparent)]
    Var(#[from] VarError),

    /// The expression sub-language failed to parse or evaluate.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// A bounded wait exceeded its budget.
    #[error("'{command}' timed out after {millis}ms")]
    Timeout {
        /// The waiting command.
        command: String,
        /// The budget that was exhausted.
        millis: u64,
    },

    /// A host interface call failed.
    #[error("host call failed: {0}")]
    Host(#[from] anyhow::Error),
}

/// Convenience result alias for command execution.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal configuration problem; the run never started or was aborted.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A command failed at the given step.
    #[error("step {step}: {source}")]
    Command {
        /// Index of the failing opcode.
        step: usize,
        /// The underlying command error.
        source: CommandError,
    },

    /// A target panicked at the given step.
    #[error("step {step}: target panicked: {detail}")]
    Panic {
        /// Index of the failing opcode.
        step: usize,
        /// Panic payload, when it was a string.
        detail: String,
    },
}

impl EngineError {
    /// Step index the error is attached to, when it occurred mid-run.
    pub fn step(&self) -> Option<usize> {
        match self {
            EngineError::Config(_) => None,
            EngineError::Command { step, .. } | EngineError::Panic { step, .. } => Some(*step),
        }
    }
}

/// Convenience result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
