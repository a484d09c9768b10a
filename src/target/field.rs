//! The Field target: read/write device fields and bounded waits on driver
//! and field state.
//!
//! Wait commands run a polling loop over an explicit phase machine
//! (`AcquireProxy → ReadFieldDef → PollValue → Done`): each retry re-enters
//! at the last phase reached rather than restarting, and the loop yields
//! `Stop` as soon as the shutdown flag is observed during a sleep.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    CommandDescriptor, CommandTarget, ExecCtx, ExecOutcome, InvokeContext, TargetId, ids,
    unknown_command,
};
use crate::engine::error::{CommandError, CommandResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::host::{DriverState, FieldProxy, WaitMode};
use crate::value::{Value, values_cmp, values_equal};

/// Target name as used in command configs.
pub const TARGET_NAME: &str = "Fields";

/// Command target for device-field access.
pub struct FieldTarget {
    fields: Arc<dyn FieldProxy>,
}

impl FieldTarget {
    /// Build a field target over the host's field proxy.
    pub fn new(fields: Arc<dyn FieldProxy>) -> Self {
        Self { fields }
    }

    fn split_path<'a>(&self, path: &'a str, index: usize) -> CommandResult<(&'a str, &'a str)> {
        path.split_once('.').ok_or(CommandError::BadParameter {
            index,
            detail: format!("'{}' must be moniker.field", path),
        })
    }

    fn read_into_var(
        &self,
        ctx: &mut ExecCtx<'_>,
        moniker: &str,
        field: &str,
        var_name: &str,
        fail_on_error: bool,
    ) -> CommandResult<ExecOutcome> {
        match self.fields.read_field(moniker, field) {
            Ok(value) => {
                ctx.vars.write(var_name, value)?;
                Ok(ExecOutcome::ok())
            }
            Err(err) if fail_on_error => Err(CommandError::Host(err)),
            Err(_) => Ok(ExecOutcome::cond(false)),
        }
    }

    fn compare_field(
        &self,
        config: &CommandConfig,
        ordering: Option<Ordering>,
    ) -> CommandResult<ExecOutcome> {
        let (moniker, field) = self.split_path(config.param(0)?, 0)?;
        let live = self.fields.read_field(moniker, field)?;
        let wanted = config.value(1)?;
        let hit = match ordering {
            None => values_equal(&live, &wanted),
            Some(ord) => values_cmp(&live, &wanted) == ord,
        };
        Ok(ExecOutcome::cond(hit))
    }
}

/// Phases of the bounded polling loop, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitPhase {
    /// Confirm the driver answers at all.
    AcquireProxy,
    /// Confirm the field exists and is readable.
    ReadFieldDef,
    /// Poll until the value satisfies the wait condition.
    PollValue,
    /// Condition satisfied.
    Done,
}

/// How one bounded wait finished.
enum WaitEnd {
    Satisfied,
    TimedOut,
    Shutdown,
}

/// Drive `advance` until done, timeout, or shutdown. `advance` inspects the
/// current phase and returns the phase to resume at next round; the loop
/// sleeps one slice between rounds.
fn poll_loop<F>(ctx: &ExecCtx<'_>, timeout: Duration, mut advance: F) -> WaitEnd
where
    F: FnMut(WaitPhase) -> WaitPhase,
{
    let deadline = Instant::now() + timeout;
    let mut phase = WaitPhase::AcquireProxy;
    loop {
        if ctx.shutdown.is_set() {
            return WaitEnd::Shutdown;
        }
        loop {
            let next = advance(phase);
            if next == WaitPhase::Done {
                return WaitEnd::Satisfied;
            }
            if next == phase {
                break;
            }
            phase = next;
        }
        if Instant::now() >= deadline {
            return WaitEnd::TimedOut;
        }
        std::thread::sleep(ctx.wait_slice);
    }
}

fn parse_millis(config: &CommandConfig, index: usize) -> CommandResult<u64> {
    config.value(index)?.as_card().map_err(|_| {
        CommandError::BadParameter {
            index,
            detail: format!("'{}' is not a millisecond count", config.param(index).unwrap_or("")),
        }
    })
}

fn parse_flag(config: &CommandConfig, index: usize, default: bool) -> CommandResult<bool> {
    match config.opt_param(index) {
        None => Ok(default),
        Some(raw) => Value::tag_literal(raw)
            .as_bool()
            .map_err(|_| CommandError::BadParameter {
                index,
                detail: format!("'{}' is not a boolean", raw),
            }),
    }
}

impl CommandTarget for FieldTarget {
    fn target_id(&self) -> TargetId {
        ids::FIELD
    }

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn enumerate_commands(&self, context: InvokeContext) -> Vec<CommandDescriptor> {
        let mut commands = vec![
            CommandDescriptor::new("ReadField", true)
                .param("Field", ParamKind::FieldName)
                .param("Into", ParamKind::VarName)
                .param("FailOnError", ParamKind::Boolean),
            CommandDescriptor::new("ReadField2", true)
                .param("Moniker", ParamKind::Text)
                .param("Field", ParamKind::Text)
                .param("Into", ParamKind::VarName)
                .param("FailOnError", ParamKind::Boolean),
            CommandDescriptor::new("FieldEquals", true)
                .param("Field", ParamKind::FieldName)
                .param("Value", ParamKind::Text),
            CommandDescriptor::new("FieldGreaterThan", true)
                .param("Field", ParamKind::FieldName)
                .param("Value", ParamKind::Text),
            CommandDescriptor::new("FieldLessThan", true)
                .param("Field", ParamKind::FieldName)
                .param("Value", ParamKind::Text),
        ];
        // Writes and blocking waits are meaningless in a preload pass.
        if context != InvokeContext::Preload {
            commands.push(
                CommandDescriptor::new("WriteField", false)
                    .param("Field", ParamKind::FieldName)
                    .param("Value", ParamKind::Text),
            );
            commands.push(
                CommandDescriptor::new("WriteField2", false)
                    .param("Moniker", ParamKind::Text)
                    .param("Field", ParamKind::Text)
                    .param("Value", ParamKind::Text),
            );
            commands.push(
                CommandDescriptor::new("WaitDriverReady", true)
                    .param("Moniker", ParamKind::Text)
                    .param("TimeoutMS", ParamKind::Number),
            );
            commands.push(
                CommandDescriptor::new("WaitFieldValue", true)
                    .param("Field", ParamKind::FieldName)
                    .param("Value", ParamKind::Text)
                    .param("TimeoutMS", ParamKind::Number)
                    .param("FailOnTimeout", ParamKind::Boolean),
            );
        }
        commands
    }

    fn default_parameters(&self, config: &mut CommandConfig) {
        if config.command == "WaitDriverReady" || config.command == "WaitFieldValue" {
            for param in &mut config.params {
                if param.kind == ParamKind::Number && param.value.is_empty() {
                    param.value = "5000".to_string();
                }
            }
        }
    }

    fn validate_parameter(
        &self,
        command: &str,
        _config: &CommandConfig,
        index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        match (command, index) {
            ("ReadField" | "FieldEquals" | "FieldGreaterThan" | "FieldLessThan" | "WriteField"
            | "WaitFieldValue", 0) => {
                if value.contains('$') {
                    // Token forms resolve at run time; nothing to check yet.
                    return Ok(());
                }
                if !value.contains('.') {
                    return Err(ValidationError::new(format!(
                        "'{}' must be moniker.field",
                        value
                    )));
                }
                Ok(())
            }
            ("WaitDriverReady", 1) | ("WaitFieldValue", 2) => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| ValidationError::new(format!("'{}' is not a timeout", value))),
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        match config.command.as_str() {
            "ReadField" => {
                let (moniker, field) = self.split_path(config.param(0)?, 0)?;
                let (moniker, field) = (moniker.to_string(), field.to_string());
                let var = config.param(1)?.to_string();
                let fail = parse_flag(config, 2, true)?;
                self.read_into_var(ctx, &moniker, &field, &var, fail)
            }
            "ReadField2" => {
                let moniker = config.param(0)?.to_string();
                let field = config.param(1)?.to_string();
                let var = config.param(2)?.to_string();
                let fail = parse_flag(config, 3, true)?;
                self.read_into_var(ctx, &moniker, &field, &var, fail)
            }
            "WriteField" => {
                let (moniker, field) = self.split_path(config.param(0)?, 0)?;
                let value = config.value(1)?;
                self.fields
                    .write_field(moniker, field, &value, WaitMode::Wait)?;
                Ok(ExecOutcome::ok())
            }
            "WriteField2" => {
                let value = config.value(2)?;
                self.fields
                    .write_field(config.param(0)?, config.param(1)?, &value, WaitMode::Wait)?;
                Ok(ExecOutcome::ok())
            }
            "FieldEquals" => self.compare_field(config, None),
            "FieldGreaterThan" => self.compare_field(config, Some(Ordering::Greater)),
            "FieldLessThan" => self.compare_field(config, Some(Ordering::Less)),
            "WaitDriverReady" => {
                let moniker = config.param(0)?.to_string();
                let millis = parse_millis(config, 1)?;
                let fields = self.fields.clone();
                let end = poll_loop(ctx, Duration::from_millis(millis), |phase| match phase {
                    WaitPhase::AcquireProxy => match fields.driver_state(&moniker) {
                        Ok(_) => WaitPhase::PollValue,
                        Err(_) => WaitPhase::AcquireProxy,
                    },
                    WaitPhase::PollValue => match fields.driver_state(&moniker) {
                        Ok(DriverState::Connected) => WaitPhase::Done,
                        _ => WaitPhase::PollValue,
                    },
                    other => other,
                });
                match end {
                    WaitEnd::Satisfied => Ok(ExecOutcome::ok()),
                    WaitEnd::Shutdown => Ok(ExecOutcome::stop()),
                    WaitEnd::TimedOut => Err(CommandError::Timeout {
                        command: "WaitDriverReady".to_string(),
                        millis,
                    }),
                }
            }
            "WaitFieldValue" => {
                let (moniker, field) = self.split_path(config.param(0)?, 0)?;
                let (moniker, field) = (moniker.to_string(), field.to_string());
                let wanted = config.value(1)?;
                let millis = parse_millis(config, 2)?;
                let fail_on_timeout = parse_flag(config, 3, false)?;
                let fields = self.fields.clone();
                let end = poll_loop(ctx, Duration::from_millis(millis), |phase| match phase {
                    WaitPhase::AcquireProxy => match fields.driver_state(&moniker) {
                        Ok(DriverState::Connected) => WaitPhase::ReadFieldDef,
                        _ => WaitPhase::AcquireProxy,
                    },
                    WaitPhase::ReadFieldDef => match fields.read_field(&moniker, &field) {
                        Ok(_) => WaitPhase::PollValue,
                        Err(_) => WaitPhase::ReadFieldDef,
                    },
                    WaitPhase::PollValue => match fields.read_field(&moniker, &field) {
                        Ok(live) if values_equal(&live, &wanted) => WaitPhase::Done,
                        _ => WaitPhase::PollValue,
                    },
                    other => other,
                });
                match end {
                    WaitEnd::Satisfied => Ok(ExecOutcome::ok()),
                    WaitEnd::Shutdown => Ok(ExecOutcome::stop()),
                    WaitEnd::TimedOut if fail_on_timeout => Err(CommandError::Timeout {
                        command: "WaitFieldValue".to_string(),
                        millis,
                    }),
                    WaitEnd::TimedOut => Ok(ExecOutcome::cond(false)),
                }
            }
            other => Err(unknown_command(TARGET_NAME, other)),
        }
    }
}
