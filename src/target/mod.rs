//! Command targets: the pluggable units an action program dispatches to.
//!
//! Each target implements the capability set in [`CommandTarget`]:
//! parameter validation, per-invocation initialize/cleanup, execution,
//! command enumeration (filtered by invocation context), and parameter
//! defaulting. The built-in set is closed and carries fixed ids; hosts may
//! add extra targets with ids at or above [`ids::EXTRA_BASE`].

/// Scheduled/triggered-event mutation target.
pub mod event;
/// Device-field read/write/wait target.
pub mod field;
/// External macro invocation target.
pub mod macros;
/// System utility target (expressions, timers, string/math helpers).
pub mod system;
/// Triggered-event envelope extraction target.
pub mod trigger;

pub use event::EventServerTarget;
pub use field::FieldTarget;
pub use macros::MacroTarget;
pub use system::SystemTarget;
pub use trigger::{EventEnvelope, TriggerTarget};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::engine::error::{CommandError, CommandResult, ConfigError, ConfigResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::engine::trace::Tracer;
use crate::engine::vars::VarScopes;
use crate::host::ShutdownFlag;

/// Stable numeric target identifier.
pub type TargetId = u32;

/// Fixed ids for the built-in targets plus the floor for host extras.
pub mod ids {
    use super::TargetId;

    /// Field target.
    pub const FIELD: TargetId = 1;
    /// Macro target.
    pub const MACRO: TargetId = 2;
    /// System target.
    pub const SYSTEM: TargetId = 3;
    /// Event-server target.
    pub const EVENT: TargetId = 4;
    /// Triggered-event-data target.
    pub const TRIGGER: TargetId = 5;
    /// Host-supplied extras must use ids at or above this.
    pub const EXTRA_BASE: TargetId = 100;
}

/// Terminal result of a command or a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmdResult {
    /// Normal completion.
    Ok,
    /// Intentional early termination of the whole program. Not an error.
    Stop,
    /// A known error type was caught at the loop boundary.
    Except,
    /// Something unclassifiable (a panic) was caught at the loop boundary.
    UnknownExcept,
}

/// What a command's `execute` hands back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Terminal result.
    pub result: CmdResult,
    /// Conditional boolean consumed by `If` opcodes.
    pub conditional: bool,
}

impl ExecOutcome {
    /// Normal completion, conditional true.
    pub fn ok() -> Self {
        Self {
            result: CmdResult::Ok,
            conditional: true,
        }
    }

    /// Normal completion with the given conditional.
    pub fn cond(conditional: bool) -> Self {
        Self {
            result: CmdResult::Ok,
            conditional,
        }
    }

    /// Halt the whole program.
    pub fn stop() -> Self {
        Self {
            result: CmdResult::Stop,
            conditional: false,
        }
    }
}

/// Invocation context a command catalog is filtered by. Some commands are
/// unsafe or meaningless when actions run from restricted contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeContext {
    /// Ordinary action invocation.
    Normal,
    /// Triggered from a UI event handler.
    UiEvent,
    /// Preload/authoring pass; nothing with side effects.
    Preload,
}

/// One command a target offers.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    /// Command name as used in [`CommandConfig::command`].
    pub name: &'static str,
    /// Whether the command yields a meaningful conditional.
    pub conditional: bool,
    /// Parameter slots in order.
    pub params: Vec<ParamSpec>,
}

/// One parameter slot of a command descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Display name.
    pub name: &'static str,
    /// Slot kind.
    pub kind: ParamKind,
}

impl CommandDescriptor {
    /// Start a descriptor.
    pub fn new(name: &'static str, conditional: bool) -> Self {
        Self {
            name,
            conditional,
            params: Vec::new(),
        }
    }

    /// Append a parameter slot (builder style).
    pub fn param(mut self, name: &'static str, kind: ParamKind) -> Self {
        self.params.push(ParamSpec { name, kind });
        self
    }
}

/// Per-invocation identity handed to `initialize`.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Id of the firing event, when the action was started by one.
    pub event_id: Option<String>,
}

/// Everything a command sees while executing one step.
pub struct ExecCtx<'a> {
    /// Index of the executing opcode.
    pub step: usize,
    /// Per-invocation identity.
    pub run: &'a RunContext,
    /// Scope-resolving variable view.
    pub vars: VarScopes<'a>,
    /// Run tracer.
    pub tracer: &'a dyn Tracer,
    /// Cooperative cancellation flag, checked during sleeps.
    pub shutdown: &'a ShutdownFlag,
    /// Granularity of interruptible sleeps.
    pub wait_slice: Duration,
}

/// Capability set every command target implements.
///
/// `initialize` and `cleanup` are called once per invocation, on the
/// invoking thread, before the first opcode and after the last (even on
/// failure); both must be reentrant since the same instance is reused
/// across invocations.
pub trait CommandTarget: Send {
    /// Stable id this target answers to.
    fn target_id(&self) -> TargetId;

    /// Target name as used in command configs.
    fn name(&self) -> &str;

    /// The catalog of commands this target offers in the given context.
    fn enumerate_commands(&self, context: InvokeContext) -> Vec<CommandDescriptor>;

    /// Fill recommended defaults for a newly placed command.
    fn default_parameters(&self, config: &mut CommandConfig) {
        let _ = config;
    }

    /// Syntactic/semantic check of one parameter before it is accepted into
    /// a program. Returned, never thrown.
    fn validate_parameter(
        &self,
        command: &str,
        config: &CommandConfig,
        index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        let _ = (command, config, index, value);
        Ok(())
    }

    /// Called at run start with the firing event's envelope, if any. Most
    /// targets ignore it.
    fn set_event(&mut self, envelope: Option<&EventEnvelope>) {
        let _ = envelope;
    }

    /// Called once before the first opcode of an invocation.
    fn initialize(&mut self, run: &RunContext) -> CommandResult<()> {
        let _ = run;
        Ok(())
    }

    /// Called once after the last opcode, even on failure. Errors are
    /// logged by the engine and never change the run's outcome.
    fn cleanup(&mut self) -> CommandResult<()> {
        Ok(())
    }

    /// Execute one (already token-expanded) command.
    fn execute(&mut self, config: &CommandConfig, ctx: &mut ExecCtx<'_>)
    -> CommandResult<ExecOutcome>;
}

/// Error for a command name a target does not offer.
pub fn unknown_command(target: &str, command: &str) -> CommandError {
    CommandError::UnknownCommand {
        target: target.to_string(),
        command: command.to_string(),
    }
}

/// The engine's live target list: built-ins plus host extras, indexed by
/// target id with a linear scan (the list never exceeds a dozen entries).
pub struct TargetRegistry {
    targets: Vec<Box<dyn CommandTarget>>,
    builtin_count: usize,
}

impl TargetRegistry {
    /// Build a registry over the built-in set.
    pub fn from_builtins(builtins: Vec<Box<dyn CommandTarget>>) -> Self {
        let builtin_count = builtins.len();
        Self {
            targets: builtins,
            builtin_count,
        }
    }

    /// Add a host-supplied extra target. Its id must be at or above
    /// [`ids::EXTRA_BASE`] and unique.
    pub fn add_extra(&mut self, target: Box<dyn CommandTarget>) -> ConfigResult<TargetId> {
        let id = target.target_id();
        if id < ids::EXTRA_BASE || self.targets.iter().any(|t| t.target_id() == id) {
            return Err(ConfigError::DuplicateTarget(id));
        }
        self.targets.push(target);
        Ok(id)
    }

    /// Drop all extras, keeping the built-ins. Called at the end of every
    /// invocation.
    pub fn flush_extras(&mut self) {
        self.targets.truncate(self.builtin_count);
    }

    /// Resolve a target name to its id.
    pub fn resolve(&self, name: &str) -> Option<TargetId> {
        self.targets
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.target_id())
    }

    /// Shared access by id.
    pub fn get(&self, id: TargetId) -> Option<&dyn CommandTarget> {
        self.targets
            .iter()
            .find(|t| t.target_id() == id)
            .map(|t| t.as_ref())
    }

    /// Mutable access by id.
    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut Box<dyn CommandTarget>> {
        self.targets.iter_mut().find(|t| t.target_id() == id)
    }

    /// Iterate all live targets.
    pub fn iter(&self) -> impl Iterator<Item = &dyn CommandTarget> {
        self.targets.iter().map(|t| t.as_ref())
    }

    /// Iterate all live targets mutably (initialize/cleanup passes).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn CommandTarget>> {
        self.targets.iter_mut()
    }

    /// Number of live targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
