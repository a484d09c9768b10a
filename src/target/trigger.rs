//! The TriggeredEventData target: typed extraction from the envelope of the
//! event that started the run.
//!
//! The envelope is an immutable semantic key→value map set by the engine at
//! run start. Each `Is*` command answers whether the envelope is that kind
//! of event and, on a match, writes the relevant sub-fields into caller
//! variables; optional fields are tolerant of absence and come back empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    CommandDescriptor, CommandTarget, ExecCtx, ExecOutcome, InvokeContext, TargetId, ids,
    unknown_command,
};
use crate::engine::error::{CommandResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::value::Value;

/// Target name as used in command configs.
pub const TARGET_NAME: &str = "TrigEvent";

/// Event classes recognized by the extraction commands.
pub mod classes {
    /// A device field changed value.
    pub const FIELD_CHANGE: &str = "fldchange";
    /// A load (switch/dimmer) changed state.
    pub const LOAD_CHANGE: &str = "loadchange";
    /// A motion sensor started or ended motion.
    pub const MOTION: &str = "motion";
    /// A lock reported its status.
    pub const LOCK_STATUS: &str = "lockstatus";
    /// A security zone alarmed or cleared.
    pub const ZONE_ALARM: &str = "zonealarm";
    /// A presence sensor saw an arrival or departure.
    pub const PRESENCE: &str = "presence";
    /// A user-defined action event.
    pub const USER_ACTION: &str = "useraction";
}

/// The immutable envelope of a triggered event: a semantic key→value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventEnvelope {
    values: BTreeMap<String, String>,
}

impl EventEnvelope {
    /// Start an envelope of the given class.
    pub fn new(class: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("class".to_string(), class.to_string());
        Self { values }
    }

    /// Add a key/value pair (builder style).
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Event class, if present.
    pub fn class(&self) -> Option<&str> {
        self.get("class")
    }

    /// Id of the firing event, if the source supplied one.
    pub fn event_id(&self) -> Option<&str> {
        self.get("evid")
    }
}

/// Command target exposing the run's triggered-event envelope.
#[derive(Default)]
pub struct TriggerTarget {
    envelope: Option<EventEnvelope>,
}

impl TriggerTarget {
    /// Build a trigger target with no envelope installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer an `Is*` command: on a class match, write the listed envelope
    /// keys into the command's variable parameters, in order.
    fn extract(
        &self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
        class: &str,
        keys: &[&str],
    ) -> CommandResult<ExecOutcome> {
        let Some(envelope) = self.envelope.as_ref().filter(|e| e.class() == Some(class)) else {
            return Ok(ExecOutcome::cond(false));
        };
        for (index, key) in keys.iter().enumerate() {
            let var = config.param(index)?.to_string();
            let value = envelope.get(key).unwrap_or("");
            ctx.vars.write(&var, Value::from(value.to_string()))?;
        }
        Ok(ExecOutcome::ok())
    }
}

impl CommandTarget for TriggerTarget {
    fn target_id(&self) -> TargetId {
        ids::TRIGGER
    }

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn set_event(&mut self, envelope: Option<&EventEnvelope>) {
        self.envelope = envelope.cloned();
    }

    fn enumerate_commands(&self, _context: InvokeContext) -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::new("IsFieldChangeEv", true)
                .param("FieldVar", ParamKind::VarName)
                .param("ValueVar", ParamKind::VarName),
            CommandDescriptor::new("IsLoadChangeEv", true)
                .param("FieldVar", ParamKind::VarName)
                .param("StateVar", ParamKind::VarName)
                .param("LoadNumVar", ParamKind::VarName),
            CommandDescriptor::new("IsMotionEv", true)
                .param("TypeVar", ParamKind::VarName)
                .param("SensorNumVar", ParamKind::VarName)
                .param("NameVar", ParamKind::VarName),
            CommandDescriptor::new("IsLockStatusEv", true)
                .param("StateVar", ParamKind::VarName)
                .param("LockIdVar", ParamKind::VarName)
                .param("CodeVar", ParamKind::VarName),
            CommandDescriptor::new("IsZoneAlarmEv", true)
                .param("StateVar", ParamKind::VarName)
                .param("ZoneNumVar", ParamKind::VarName)
                .param("NameVar", ParamKind::VarName),
            CommandDescriptor::new("IsPresenceEv", true)
                .param("TypeVar", ParamKind::VarName)
                .param("IdVar", ParamKind::VarName)
                .param("AreaVar", ParamKind::VarName),
            CommandDescriptor::new("IsUserActionEv", true)
                .param("TypeVar", ParamKind::VarName)
                .param("DataVar", ParamKind::VarName),
            CommandDescriptor::new("GetEvField", true)
                .param("Key", ParamKind::Text)
                .param("Into", ParamKind::VarName),
        ]
    }

    fn validate_parameter(
        &self,
        _command: &str,
        _config: &CommandConfig,
        _index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("parameter is empty"));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        match config.command.as_str() {
            "IsFieldChangeEv" => {
                self.extract(config, ctx, classes::FIELD_CHANGE, &["field", "val"])
            }
            "IsLoadChangeEv" => self.extract(
                config,
                ctx,
                classes::LOAD_CHANGE,
                &["field", "state", "loadnum"],
            ),
            "IsMotionEv" => self.extract(
                config,
                ctx,
                classes::MOTION,
                &["type", "sensornum", "name"],
            ),
            "IsLockStatusEv" => self.extract(
                config,
                ctx,
                classes::LOCK_STATUS,
                &["state", "lockid", "code"],
            ),
            "IsZoneAlarmEv" => self.extract(
                config,
                ctx,
                classes::ZONE_ALARM,
                &["state", "zonenum", "name"],
            ),
            "IsPresenceEv" => {
                self.extract(config, ctx, classes::PRESENCE, &["type", "uid", "area"])
            }
            "IsUserActionEv" => {
                self.extract(config, ctx, classes::USER_ACTION, &["type", "data"])
            }
            "GetEvField" => {
                let key = config.param(0)?.to_string();
                let var = config.param(1)?.to_string();
                match self.envelope.as_ref().and_then(|e| e.get(&key)) {
                    Some(value) => {
                        ctx.vars.write(&var, Value::from(value.to_string()))?;
                        Ok(ExecOutcome::ok())
                    }
                    None => {
                        ctx.vars.write(&var, Value::from(String::new()))?;
                        Ok(ExecOutcome::cond(false))
                    }
                }
            }
            other => Err(unknown_command(TARGET_NAME, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::trace::NullTracer;
    use crate::engine::vars::{GlobalVars, LocalVars, VarScopes};
    use crate::host::ShutdownFlag;
    use crate::target::RunContext;
    use std::time::Duration;
    use uuid::Uuid;

    fn run(
        target: &mut TriggerTarget,
        config: &CommandConfig,
        local: &mut LocalVars,
    ) -> ExecOutcome {
        let global = GlobalVars::new();
        let shutdown = ShutdownFlag::new();
        let run = RunContext {
            run_id: Uuid::new_v4(),
            event_id: None,
        };
        let mut ctx = ExecCtx {
            step: 0,
            run: &run,
            vars: VarScopes::new(local, &global, &NullTracer),
            tracer: &NullTracer,
            shutdown: &shutdown,
            wait_slice: Duration::from_millis(5),
        };
        target.execute(config, &mut ctx).unwrap()
    }

    fn motion_envelope() -> EventEnvelope {
        EventEnvelope::new(classes::MOTION)
            .with("type", "start")
            .with("sensornum", "4")
            .with("name", "hallway")
            .with("evid", "ev-123")
    }

    #[test]
    fn matching_class_extracts_fields() {
        let mut target = TriggerTarget::new();
        let envelope = motion_envelope();
        target.set_event(Some(&envelope));
        let mut local = LocalVars::new();

        let config = CommandConfig::new(TARGET_NAME, "IsMotionEv")
            .arg("local:type", ParamKind::VarName)
            .arg("local:num", ParamKind::VarName)
            .arg("local:name", ParamKind::VarName);
        let out = run(&mut target, &config, &mut local);
        assert!(out.conditional);
        assert_eq!(local.get("type"), Some(Value::from("start")));
        assert_eq!(local.get("num"), Some(Value::from("4")));
        assert_eq!(local.get("name"), Some(Value::from("hallway")));
    }

    #[test]
    fn wrong_class_answers_false_without_writing() {
        let mut target = TriggerTarget::new();
        let envelope = motion_envelope();
        target.set_event(Some(&envelope));
        let mut local = LocalVars::new();

        let config = CommandConfig::new(TARGET_NAME, "IsZoneAlarmEv")
            .arg("local:state", ParamKind::VarName)
            .arg("local:num", ParamKind::VarName)
            .arg("local:name", ParamKind::VarName);
        let out = run(&mut target, &config, &mut local);
        assert!(!out.conditional);
        assert!(local.get("state").is_none());
    }

    #[test]
    fn absent_optional_fields_come_back_empty() {
        let mut target = TriggerTarget::new();
        let envelope = EventEnvelope::new(classes::LOAD_CHANGE).with("field", "Lamp.State");
        target.set_event(Some(&envelope));
        let mut local = LocalVars::new();

        let config = CommandConfig::new(TARGET_NAME, "IsLoadChangeEv")
            .arg("local:fld", ParamKind::VarName)
            .arg("local:state", ParamKind::VarName)
            .arg("local:num", ParamKind::VarName);
        let out = run(&mut target, &config, &mut local);
        assert!(out.conditional);
        assert_eq!(local.get("fld"), Some(Value::from("Lamp.State")));
        assert_eq!(local.get("state"), Some(Value::from("")));
        assert_eq!(local.get("num"), Some(Value::from("")));
    }

    #[test]
    fn no_envelope_means_no_event_of_any_kind() {
        let mut target = TriggerTarget::new();
        let mut local = LocalVars::new();
        let config = CommandConfig::new(TARGET_NAME, "IsUserActionEv")
            .arg("local:type", ParamKind::VarName)
            .arg("local:data", ParamKind::VarName);
        let out = run(&mut target, &config, &mut local);
        assert!(!out.conditional);
    }

    #[test]
    fn get_ev_field_is_generic() {
        let mut target = TriggerTarget::new();
        let envelope = motion_envelope();
        target.set_event(Some(&envelope));
        let mut local = LocalVars::new();

        let config = CommandConfig::new(TARGET_NAME, "GetEvField")
            .arg("sensornum", ParamKind::Text)
            .arg("local:n", ParamKind::VarName);
        let out = run(&mut target, &config, &mut local);
        assert!(out.conditional);
        assert_eq!(local.get("n"), Some(Value::from("4")));
    }

    #[test]
    fn envelope_json_round_trip() {
        let envelope = motion_envelope();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.event_id(), Some("ev-123"));
    }
}
