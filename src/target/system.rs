//! The System target: pure utility commands, timer channels, the expression
//! sub-language entry point, and the `Stop` command that halts the whole
//! program.

use chrono::{Datelike, Timelike, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    CommandDescriptor, CommandTarget, ExecCtx, ExecOutcome, InvokeContext, TargetId, ids,
    unknown_command,
};
use crate::engine::error::{CommandError, CommandResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::expr;
use crate::host::FieldProxy;
use crate::value::{Value, ValueKind, values_cmp, values_equal};

/// Target name as used in command configs.
pub const TARGET_NAME: &str = "System";

/// Number of timer channels.
pub const TIMER_SLOTS: usize = 16;

/// Command target for system utilities.
pub struct SystemTarget {
    fields: Arc<dyn FieldProxy>,
    /// Timer channels, all stamped at construction so `GetTimerVal` is
    /// always answerable.
    timers: [Instant; TIMER_SLOTS],
}

impl SystemTarget {
    /// Build a system target; the field proxy serves `$( )` references in
    /// expressions.
    pub fn new(fields: Arc<dyn FieldProxy>) -> Self {
        Self {
            fields,
            timers: [Instant::now(); TIMER_SLOTS],
        }
    }

    fn timer_slot(&self, config: &CommandConfig, index: usize) -> CommandResult<usize> {
        let slot = config.value(index)?.as_card()? as usize;
        if slot >= TIMER_SLOTS {
            return Err(CommandError::BadParameter {
                index,
                detail: format!("timer slot {} out of range 0..{}", slot, TIMER_SLOTS),
            });
        }
        Ok(slot)
    }

    /// Timestamp parameter; an empty slot means "now".
    fn time_param(
        &self,
        config: &CommandConfig,
        index: usize,
    ) -> CommandResult<chrono::DateTime<Utc>> {
        match config.opt_param(index) {
            None => Ok(Utc::now()),
            Some(_) => match config.value(index)?.require(ValueKind::Time)? {
                Value::Time(t) => Ok(t),
                _ => unreachable!(),
            },
        }
    }
}

/// Great-circle distance between two lat/long pairs, in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Sleep until `deadline` in `slice` increments, reporting whether the
/// shutdown flag was observed.
fn sleep_until(ctx: &ExecCtx<'_>, deadline: Instant) -> bool {
    loop {
        if ctx.shutdown.is_set() {
            return true;
        }
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        std::thread::sleep(remaining.min(ctx.wait_slice));
    }
}

impl CommandTarget for SystemTarget {
    fn target_id(&self) -> TargetId {
        ids::SYSTEM
    }

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn enumerate_commands(&self, context: InvokeContext) -> Vec<CommandDescriptor> {
        let mut commands = vec![
            CommandDescriptor::new("EvaluateExpr", true)
                .param("Expression", ParamKind::Expression)
                .param("Into", ParamKind::VarName),
            CommandDescriptor::new("Stop", false),
            CommandDescriptor::new("Equals", true)
                .param("Value1", ParamKind::Text)
                .param("Value2", ParamKind::Text),
            CommandDescriptor::new("GreaterThan", true)
                .param("Value1", ParamKind::Text)
                .param("Value2", ParamKind::Text),
            CommandDescriptor::new("LessThan", true)
                .param("Value1", ParamKind::Text)
                .param("Value2", ParamKind::Text),
            CommandDescriptor::new("GetLength", false)
                .param("Text", ParamKind::Text)
                .param("Into", ParamKind::VarName),
            CommandDescriptor::new("GetNthToken", true)
                .param("Text", ParamKind::Text)
                .param("Separator", ParamKind::Text)
                .param("Index", ParamKind::Number)
                .param("Into", ParamKind::VarName),
            CommandDescriptor::new("Contains", true)
                .param("Text", ParamKind::Text)
                .param("Needle", ParamKind::Text),
            CommandDescriptor::new("GetDateParts", false)
                .param("Time", ParamKind::Text)
                .param("YearVar", ParamKind::VarName)
                .param("MonthVar", ParamKind::VarName)
                .param("DayVar", ParamKind::VarName),
            CommandDescriptor::new("GetTimeParts", false)
                .param("Time", ParamKind::Text)
                .param("HourVar", ParamKind::VarName)
                .param("MinuteVar", ParamKind::VarName)
                .param("SecondVar", ParamKind::VarName),
            CommandDescriptor::new("ResetTimer", false).param("Slot", ParamKind::Number),
            CommandDescriptor::new("GetTimerVal", false)
                .param("Slot", ParamKind::Number)
                .param("Into", ParamKind::VarName),
            CommandDescriptor::new("GetRandomNum", false)
                .param("Low", ParamKind::Number)
                .param("High", ParamKind::Number)
                .param("Into", ParamKind::VarName),
            CommandDescriptor::new("CalcGeoDistance", false)
                .param("Lat1", ParamKind::Number)
                .param("Lon1", ParamKind::Number)
                .param("Lat2", ParamKind::Number)
                .param("Lon2", ParamKind::Number)
                .param("Into", ParamKind::VarName),
        ];
        // Blocking waits and outward-facing commands stay out of restricted
        // contexts.
        if context == InvokeContext::Normal {
            commands.push(
                CommandDescriptor::new("Pause", false).param("Millis", ParamKind::Number),
            );
            commands.push(
                CommandDescriptor::new("WaitTimer", true)
                    .param("Slot", ParamKind::Number)
                    .param("PeriodMS", ParamKind::Number),
            );
            commands.push(
                CommandDescriptor::new("HTTPGet", true)
                    .param("Url", ParamKind::Text)
                    .param("Into", ParamKind::VarName)
                    .param("TimeoutMS", ParamKind::Number),
            );
            commands.push(CommandDescriptor::new("SayText", false).param("Text", ParamKind::Text));
        }
        commands
    }

    fn validate_parameter(
        &self,
        command: &str,
        _config: &CommandConfig,
        index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        match (command, index) {
            ("EvaluateExpr", 0) => expr::parse(value)
                .map(|_| ())
                .map_err(|err| ValidationError::new(err.to_string())),
            ("ResetTimer" | "GetTimerVal" | "WaitTimer", 0) => match value.parse::<usize>() {
                Ok(slot) if slot < TIMER_SLOTS => Ok(()),
                _ => Err(ValidationError::new(format!(
                    "timer slot must be 0..{}",
                    TIMER_SLOTS
                ))),
            },
            ("GetNthToken", 2) | ("Pause", 0) | ("WaitTimer", 1) | ("HTTPGet", 2) => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| ValidationError::new(format!("'{}' is not a number", value))),
            ("GetRandomNum", 0 | 1) => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| ValidationError::new(format!("'{}' is not a number", value))),
            ("CalcGeoDistance", 0..=3) => value
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| ValidationError::new(format!("'{}' is not a coordinate", value))),
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        match config.command.as_str() {
            "EvaluateExpr" => {
                let node = expr::parse(config.param(0)?)?;
                let outcome = expr::evaluate(&node, self.fields.as_ref(), &ctx.vars)?;
                ctx.tracer.expression(&outcome.expanded);
                if let Some(var) = config.opt_param(1) {
                    let var = var.to_string();
                    ctx.vars.write(&var, Value::Boolean(outcome.value))?;
                }
                Ok(ExecOutcome::cond(outcome.value))
            }
            "Stop" => Ok(ExecOutcome::stop()),
            "Equals" => Ok(ExecOutcome::cond(values_equal(
                &config.value(0)?,
                &config.value(1)?,
            ))),
            "GreaterThan" => Ok(ExecOutcome::cond(
                values_cmp(&config.value(0)?, &config.value(1)?) == std::cmp::Ordering::Greater,
            )),
            "LessThan" => Ok(ExecOutcome::cond(
                values_cmp(&config.value(0)?, &config.value(1)?) == std::cmp::Ordering::Less,
            )),
            "GetLength" => {
                let len = config.param(0)?.chars().count() as u64;
                let var = config.param(1)?.to_string();
                ctx.vars.write(&var, Value::Card(len))?;
                Ok(ExecOutcome::ok())
            }
            "GetNthToken" => {
                let text = config.param(0)?.to_string();
                let sep = config.param(1)?.to_string();
                let index = config.value(2)?.as_card()? as usize;
                let var = config.param(3)?.to_string();
                if index == 0 || sep.is_empty() {
                    return Err(CommandError::BadParameter {
                        index: 2,
                        detail: "token index is 1-based and needs a separator".to_string(),
                    });
                }
                let token = text.split(&sep).nth(index - 1);
                ctx.vars
                    .write(&var, Value::from(token.unwrap_or("").to_string()))?;
                Ok(ExecOutcome::cond(token.is_some()))
            }
            "Contains" => {
                let hit = config.param(0)?.contains(config.param(1)?);
                Ok(ExecOutcome::cond(hit))
            }
            "GetDateParts" => {
                let when = self.time_param(config, 0)?;
                for (index, part) in [
                    (1, when.year() as i64),
                    (2, when.month() as i64),
                    (3, when.day() as i64),
                ] {
                    let var = config.param(index)?.to_string();
                    ctx.vars.write(&var, Value::Int(part))?;
                }
                Ok(ExecOutcome::ok())
            }
            "GetTimeParts" => {
                let when = self.time_param(config, 0)?;
                for (index, part) in [
                    (1, when.hour() as i64),
                    (2, when.minute() as i64),
                    (3, when.second() as i64),
                ] {
                    let var = config.param(index)?.to_string();
                    ctx.vars.write(&var, Value::Int(part))?;
                }
                Ok(ExecOutcome::ok())
            }
            "ResetTimer" => {
                let slot = self.timer_slot(config, 0)?;
                self.timers[slot] = Instant::now();
                Ok(ExecOutcome::ok())
            }
            "GetTimerVal" => {
                let slot = self.timer_slot(config, 0)?;
                let elapsed = self.timers[slot].elapsed().as_millis() as u64;
                let var = config.param(1)?.to_string();
                ctx.vars.write(&var, Value::Card(elapsed))?;
                Ok(ExecOutcome::ok())
            }
            "WaitTimer" => {
                let slot = self.timer_slot(config, 0)?;
                let period = Duration::from_millis(config.value(1)?.as_card()?);
                let deadline = self.timers[slot] + period;
                if sleep_until(ctx, deadline) {
                    return Ok(ExecOutcome::stop());
                }
                // Advance one period; fall back to now if we missed badly.
                let now = Instant::now();
                self.timers[slot] = if now.duration_since(deadline) > period {
                    now
                } else {
                    deadline
                };
                Ok(ExecOutcome::ok())
            }
            "Pause" => {
                let millis = config.value(0)?.as_card()?;
                let deadline = Instant::now() + Duration::from_millis(millis);
                if sleep_until(ctx, deadline) {
                    return Ok(ExecOutcome::stop());
                }
                Ok(ExecOutcome::ok())
            }
            "GetRandomNum" => {
                let low = config.value(0)?.as_card()?;
                let high = config.value(1)?.as_card()?;
                if low >= high {
                    return Err(CommandError::BadParameter {
                        index: 1,
                        detail: format!("range {}..{} is empty", low, high),
                    });
                }
                let picked = rand::thread_rng().gen_range(low..=high);
                let var = config.param(2)?.to_string();
                ctx.vars.write(&var, Value::Card(picked))?;
                Ok(ExecOutcome::ok())
            }
            "CalcGeoDistance" => {
                let lat1 = config.value(0)?.as_float()?;
                let lon1 = config.value(1)?.as_float()?;
                let lat2 = config.value(2)?.as_float()?;
                let lon2 = config.value(3)?.as_float()?;
                let var = config.param(4)?.to_string();
                ctx.vars
                    .write(&var, Value::Float(haversine_km(lat1, lon1, lat2, lon2)))?;
                Ok(ExecOutcome::ok())
            }
            "HTTPGet" => {
                let url = config.param(0)?.to_string();
                let var = config.param(1)?.to_string();
                let timeout = config
                    .opt_param(2)
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(5000);
                let body = ureq::get(&url)
                    .timeout(Duration::from_millis(timeout))
                    .call()
                    .ok()
                    .and_then(|resp| resp.into_string().ok());
                match body {
                    Some(text) => {
                        ctx.vars.write(&var, Value::from(text))?;
                        Ok(ExecOutcome::ok())
                    }
                    None => {
                        ctx.vars.write(&var, Value::from(String::new()))?;
                        Ok(ExecOutcome::cond(false))
                    }
                }
            }
            "SayText" => {
                let text = config.param(0)?;
                tracing::info!(target: "baton::speech", text, "speak");
                Ok(ExecOutcome::ok())
            }
            other => Err(unknown_command(TARGET_NAME, other)),
        }
    }
}
