//! The EventServer target: pause/resume and schedule mutation for
//! scheduled/triggered events.
//!
//! Events are keyed by a type-relative path plus an optimistic serial
//! number; the target caches the last serial seen per path and validates
//! day/hour/minute triples and weekly/monthly bit masks before sending
//! anything to the store.

use std::collections::HashMap;

use super::{
    CommandDescriptor, CommandTarget, ExecCtx, ExecOutcome, InvokeContext, TargetId, ids,
    unknown_command,
};
use crate::engine::error::{CommandError, CommandResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::host::EventStore;

/// Target name as used in command configs.
pub const TARGET_NAME: &str = "EventServer";

/// Highest legal weekly mask: one bit per day.
const WEEKLY_MASK_MAX: u32 = (1 << 7) - 1;
/// Highest legal monthly mask: one bit per month.
const MONTHLY_MASK_MAX: u32 = (1 << 12) - 1;

/// Command target for scheduled/triggered event mutation.
pub struct EventServerTarget {
    store: Box<dyn EventStore>,
    serials: HashMap<String, u32>,
}

impl EventServerTarget {
    /// Build an event-server target over the host's store.
    pub fn new(store: Box<dyn EventStore>) -> Self {
        Self {
            store,
            serials: HashMap::new(),
        }
    }

    fn serial_for(&self, path: &str) -> u32 {
        self.serials.get(path).copied().unwrap_or(0)
    }

    fn set_paused(&mut self, config: &CommandConfig, paused: bool) -> CommandResult<ExecOutcome> {
        let path = config.param(0)?.to_string();
        let serial = self.serial_for(&path);
        let next = self.store.set_paused(&path, serial, paused)?;
        self.serials.insert(path, next);
        Ok(ExecOutcome::ok())
    }

    fn range_param(
        &self,
        config: &CommandConfig,
        index: usize,
        what: &str,
        max: u32,
    ) -> CommandResult<u32> {
        let value = config.value(index)?.as_card()? as u32;
        if value > max {
            return Err(CommandError::BadParameter {
                index,
                detail: format!("{} {} exceeds {}", what, value, max),
            });
        }
        Ok(value)
    }
}

fn check_mask(kind: &str, mask: u32) -> Result<(), String> {
    let max = match kind {
        "weekly" => WEEKLY_MASK_MAX,
        "monthly" => MONTHLY_MASK_MAX,
        other => return Err(format!("period kind '{}' is not weekly/monthly", other)),
    };
    if mask == 0 || mask > max {
        return Err(format!("{} mask {:#x} out of range 1..={:#x}", kind, mask, max));
    }
    Ok(())
}

impl CommandTarget for EventServerTarget {
    fn target_id(&self) -> TargetId {
        ids::EVENT
    }

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn enumerate_commands(&self, context: InvokeContext) -> Vec<CommandDescriptor> {
        // Schedule mutation is a side effect; preload passes only browse.
        if context == InvokeContext::Preload {
            return Vec::new();
        }
        vec![
            CommandDescriptor::new("PauseSchedEv", false).param("Path", ParamKind::Text),
            CommandDescriptor::new("ResumeSchedEv", false).param("Path", ParamKind::Text),
            CommandDescriptor::new("PauseTrigEv", false).param("Path", ParamKind::Text),
            CommandDescriptor::new("ResumeTrigEv", false).param("Path", ParamKind::Text),
            CommandDescriptor::new("SetSchedEvTime", false)
                .param("Path", ParamKind::Text)
                .param("Day", ParamKind::Number)
                .param("Hour", ParamKind::Number)
                .param("Minute", ParamKind::Number),
            CommandDescriptor::new("SetPerEvTime", false)
                .param("Path", ParamKind::Text)
                .param("Kind", ParamKind::Text)
                .param("Mask", ParamKind::Number)
                .param("Offset", ParamKind::Number),
        ]
    }

    fn validate_parameter(
        &self,
        command: &str,
        config: &CommandConfig,
        index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        match (command, index) {
            (_, 0) if value.trim().is_empty() => Err(ValidationError::new("event path is empty")),
            ("SetSchedEvTime", 1..=3) => {
                let max = [31u32, 23, 59][index - 1];
                match value.parse::<u32>() {
                    Ok(v) if v <= max => Ok(()),
                    _ => Err(ValidationError::new(format!(
                        "'{}' out of range 0..={}",
                        value, max
                    ))),
                }
            }
            ("SetPerEvTime", 1) => {
                if value == "weekly" || value == "monthly" {
                    Ok(())
                } else {
                    Err(ValidationError::new(format!(
                        "period kind '{}' is not weekly/monthly",
                        value
                    )))
                }
            }
            ("SetPerEvTime", 2) => {
                let kind = config.opt_param(1).unwrap_or("weekly");
                let mask = value
                    .parse::<u32>()
                    .map_err(|_| ValidationError::new(format!("'{}' is not a mask", value)))?;
                check_mask(kind, mask).map_err(ValidationError::new)
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        _ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        match config.command.as_str() {
            "PauseSchedEv" | "PauseTrigEv" => self.set_paused(config, true),
            "ResumeSchedEv" | "ResumeTrigEv" => self.set_paused(config, false),
            "SetSchedEvTime" => {
                let path = config.param(0)?.to_string();
                let day = self.range_param(config, 1, "day", 31)?;
                let hour = self.range_param(config, 2, "hour", 23)?;
                let minute = self.range_param(config, 3, "minute", 59)?;
                let serial = self.serial_for(&path);
                let next = self
                    .store
                    .set_scheduled_time(&path, serial, day, hour, minute)?;
                self.serials.insert(path, next);
                Ok(ExecOutcome::ok())
            }
            "SetPerEvTime" => {
                let path = config.param(0)?.to_string();
                let kind = config.param(1)?.to_string();
                let mask = config.value(2)?.as_card()? as u32;
                check_mask(&kind, mask).map_err(|detail| CommandError::BadParameter {
                    index: 2,
                    detail,
                })?;
                let offset = config.value(3)?.as_card()? as u32;
                let serial = self.serial_for(&path);
                let next = self.store.set_period(&path, serial, mask, offset)?;
                self.serials.insert(path, next);
                Ok(ExecOutcome::ok())
            }
            other => Err(unknown_command(TARGET_NAME, other)),
        }
    }
}
