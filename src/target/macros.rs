//! The Macro target: runs named external scripts through the host's macro
//! loader, binding constants and by-reference variables and copying outputs
//! back after the call.

use super::{
    CommandDescriptor, CommandTarget, ExecCtx, ExecOutcome, InvokeContext, TargetId, ids,
    unknown_command,
};
use crate::engine::error::{CommandError, CommandResult, ValidationError};
use crate::engine::program::{CommandConfig, ParamKind};
use crate::host::{LoadedMacro, MacroLoader, MacroParam, ParamDir};
use crate::value::Value;

/// Target name as used in command configs.
pub const TARGET_NAME: &str = "MacroEngine";

/// Command target for external macro invocation.
///
/// The session is constructed lazily on first `RunMacro` and reused across
/// invocations; `ResetMacro` discards its cached execution state so the next
/// run starts fresh.
pub struct MacroTarget {
    loader: Box<dyn MacroLoader>,
    session: Option<Session>,
}

struct Session {
    class_path: String,
    loaded: Box<dyn LoadedMacro>,
}

/// One argument as authored: either a constant or a by-reference variable.
enum Binding {
    Constant(Value),
    ByRef(String),
}

impl MacroTarget {
    /// Build a macro target over the host's loader.
    pub fn new(loader: Box<dyn MacroLoader>) -> Self {
        Self {
            loader,
            session: None,
        }
    }

    /// Split an argument string on whitespace, honoring double quotes.
    fn split_args(raw: &str) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        for ch in raw.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            args.push(current);
        }
        args
    }

    /// Parse one argument token. `%(name)` binds the named variable by
    /// reference; anything else is a constant.
    fn parse_binding(token: &str) -> Binding {
        if let Some(body) = token
            .strip_prefix("%(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Binding::ByRef(body.to_string())
        } else {
            Binding::Constant(Value::tag_literal(token))
        }
    }

    fn run_macro(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        let class_path = config.param(0)?.to_string();
        let bindings: Vec<Binding> = Self::split_args(config.opt_param(1).unwrap_or(""))
            .iter()
            .map(|token| Self::parse_binding(token))
            .collect();

        // By-reference parameters must name existing variables.
        let mut params = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            match binding {
                Binding::Constant(value) => params.push(MacroParam {
                    value: value.clone(),
                    dir: ParamDir::In,
                }),
                Binding::ByRef(name) => params.push(MacroParam {
                    value: ctx.vars.read(name)?,
                    dir: ParamDir::InOut,
                }),
            }
        }

        let reuse = self
            .session
            .as_ref()
            .is_some_and(|s| s.class_path == class_path);
        if !reuse {
            let loaded = self.loader.load(&class_path)?;
            self.session = Some(Session { class_path, loaded });
        }
        let ret = match self.session.as_mut() {
            Some(session) => session.loaded.invoke(&mut params[..])?,
            None => {
                return Err(CommandError::BadParameter {
                    index: 0,
                    detail: "macro session unavailable".to_string(),
                });
            }
        };

        // Copy outputs back into their source variables.
        for (binding, param) in bindings.iter().zip(params.iter()) {
            if let (Binding::ByRef(name), ParamDir::Out | ParamDir::InOut) = (binding, param.dir) {
                ctx.vars.write(name, param.value.clone())?;
            }
        }

        Ok(ExecOutcome::cond(ret == 0))
    }
}

impl CommandTarget for MacroTarget {
    fn target_id(&self) -> TargetId {
        ids::MACRO
    }

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn enumerate_commands(&self, context: InvokeContext) -> Vec<CommandDescriptor> {
        // Running arbitrary macros is not offered in a preload pass.
        if context == InvokeContext::Preload {
            return vec![CommandDescriptor::new("ResetMacro", false)];
        }
        vec![
            CommandDescriptor::new("RunMacro", true)
                .param("ClassPath", ParamKind::Text)
                .param("Args", ParamKind::Text),
            CommandDescriptor::new("ResetMacro", false),
        ]
    }

    fn validate_parameter(
        &self,
        command: &str,
        _config: &CommandConfig,
        index: usize,
        value: &str,
    ) -> Result<(), ValidationError> {
        if command == "RunMacro" && index == 0 && value.trim().is_empty() {
            return Err(ValidationError::new("macro class path is empty"));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        config: &CommandConfig,
        ctx: &mut ExecCtx<'_>,
    ) -> CommandResult<ExecOutcome> {
        match config.command.as_str() {
            "RunMacro" => self.run_macro(config, ctx),
            "ResetMacro" => {
                if let Some(session) = self.session.as_mut() {
                    session.loaded.reset();
                }
                Ok(ExecOutcome::ok())
            }
            other => Err(unknown_command(TARGET_NAME, other)),
        }
    }
}
