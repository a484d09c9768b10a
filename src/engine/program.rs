//! The resolved, ready-to-run action program: opcodes, command
//! configurations, parameter token expansion, and a builder that computes
//! branch offsets.
//!
//! A program is a flat array of steps; `If`/`Else` encode relative jumps
//! rather than nested structure, which keeps the engine a simple
//! index-stepping loop and preserves the step-index correspondence used for
//! error reporting and tracing.

use serde::{Deserialize, Serialize};

use super::error::{CommandError, CommandResult, ConfigError, ConfigResult};
use super::vars::VarScopes;
use crate::host::FieldProxy;
use crate::target::TargetId;
use crate::value::Value;

/// What a parameter slot holds, which decides whether token expansion
/// applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Free text; expanded.
    Text,
    /// Numeric value; expanded.
    Number,
    /// Boolean value; expanded.
    Boolean,
    /// Name of a variable the command reads or writes; never expanded.
    VarName,
    /// `moniker.field` device-field path; expanded.
    FieldName,
    /// Expression source; never expanded, the evaluator needs live
    /// field/variable identity rather than a pre-substituted string.
    Expression,
}

impl ParamKind {
    /// Whether per-step token expansion applies to this kind.
    pub fn expands(self) -> bool {
        !matches!(self, ParamKind::Expression | ParamKind::VarName)
    }
}

/// One parameter slot holding a raw, unexpanded string value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdParam {
    /// Raw value as authored.
    pub value: String,
    /// Slot kind.
    pub kind: ParamKind,
}

/// Identifies a target and command plus the ordered parameter slots.
///
/// The stored form is an immutable template; the engine token-expands a
/// per-step working copy before dispatch, so mutation never touches the
/// program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Target name as authored.
    pub target_name: String,
    /// Numeric target id, resolved once at program-load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<TargetId>,
    /// Command name within the target's catalog.
    pub command: String,
    /// Ordered parameter slots.
    pub params: Vec<CmdParam>,
}

impl CommandConfig {
    /// Start a config for `target_name.command` with no parameters.
    pub fn new(target_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            target_id: None,
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter slot (builder style).
    pub fn arg(mut self, value: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(CmdParam {
            value: value.into(),
            kind,
        });
        self
    }

    /// Raw text of parameter `index`, or a missing-parameter error.
    pub fn param(&self, index: usize) -> CommandResult<&str> {
        self.params
            .get(index)
            .map(|p| p.value.as_str())
            .ok_or(CommandError::BadParameter {
                index,
                detail: "missing parameter".to_string(),
            })
    }

    /// Parameter `index` tagged with the richest kind it parses as.
    pub fn value(&self, index: usize) -> CommandResult<Value> {
        Ok(Value::tag_literal(self.param(index)?))
    }

    /// Parameter `index` if present and non-empty.
    pub fn opt_param(&self, index: usize) -> Option<&str> {
        self.params
            .get(index)
            .map(|p| p.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Render for the tracer: `Target.Command(p1, p2)`.
    pub fn display(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.value.as_str()).collect();
        format!(
            "{}.{}({})",
            self.target_name,
            self.command,
            params.join(", ")
        )
    }
}

/// One step of an action program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    /// Annotation; never executed.
    Comment(String),
    /// Landing pad closing an `If`/`Else` region; a no-op.
    End,
    /// Unconditional jump to the matching `End`, `jump` steps ahead.
    Else {
        /// Relative instruction-index delta to the matching `End`.
        jump: i32,
    },
    /// Conditional command; falls through on true, jumps on false.
    If {
        /// Relative delta to the matching `Else` or `End`.
        jump: i32,
        /// XOR'd with the command's conditional before branching.
        negate: bool,
        /// The conditional command to dispatch.
        config: CommandConfig,
    },
    /// Plain command dispatch.
    Cmd {
        /// The command to dispatch.
        config: CommandConfig,
    },
}

/// An opcode plus its disabled flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Disabled steps are skipped without dispatch.
    #[serde(default)]
    pub disabled: bool,
    /// The opcode.
    pub op: Opcode,
}

impl Step {
    /// Wrap an opcode as an enabled step.
    pub fn new(op: Opcode) -> Self {
        Self {
            disabled: false,
            op,
        }
    }
}

/// The resolved, ready-to-execute opcode stream for one automation action.
///
/// Compiled once and reused read-only across invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProgram {
    /// Action name, for tracing and error reporting.
    pub name: String,
    /// The opcode stream.
    pub steps: Vec<Step>,
}

impl ActionProgram {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the program has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the branch invariants: every `If` jump lands on an `Else` or
    /// `End`, every `Else` jump on an `End`, all in bounds.
    pub fn validate(&self) -> ConfigResult<()> {
        for (index, step) in self.steps.iter().enumerate() {
            let (jump, wants_end_only) = match &step.op {
                Opcode::If { jump, .. } => (*jump, false),
                Opcode::Else { jump } => (*jump, true),
                _ => continue,
            };
            if jump < 1 {
                return Err(ConfigError::BadJump {
                    index,
                    detail: format!("jump offset {} must be forward", jump),
                });
            }
            let target = index as i64 + jump as i64;
            let Some(landed) = usize::try_from(target).ok().and_then(|t| self.steps.get(t))
            else {
                return Err(ConfigError::BadJump {
                    index,
                    detail: format!("jump to {} is out of bounds", target),
                });
            };
            match (&landed.op, wants_end_only) {
                (Opcode::End, _) => {}
                (Opcode::Else { .. }, false) => {}
                _ => {
                    return Err(ConfigError::BadJump {
                        index,
                        detail: format!("jump to {} does not land on Else/End", target),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve target names to ids via the supplied lookup. Fails on the
    /// first name the lookup does not know.
    pub fn resolve_targets<F>(&mut self, mut lookup: F) -> ConfigResult<()>
    where
        F: FnMut(&str) -> Option<TargetId>,
    {
        for step in &mut self.steps {
            let config = match &mut step.op {
                Opcode::If { config, .. } | Opcode::Cmd { config } => config,
                _ => continue,
            };
            match lookup(&config.target_name) {
                Some(id) => config.target_id = Some(id),
                None => {
                    return Err(ConfigError::UnresolvedTarget(config.target_name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Expand replacement tokens in parameter text against current variable and
/// field state: `%(name)` reads a variable (reference-only, absence is a
/// hard error) and `$(moniker.field)` reads a device field.
pub fn expand_text(
    text: &str,
    vars: &VarScopes<'_>,
    fields: &dyn FieldProxy,
) -> CommandResult<String> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let sigil = bytes[i];
        if (sigil == b'%' || sigil == b'$') && bytes.get(i + 1) == Some(&b'(') {
            let start = i + 2;
            let Some(close) = text[start..].find(')').map(|off| start + off) else {
                return Err(CommandError::BadParameter {
                    index: 0,
                    detail: format!("unterminated token in '{}'", text),
                });
            };
            let body = &text[start..close];
            if sigil == b'%' {
                out.push_str(&vars.read(body)?.to_string());
            } else {
                let (moniker, field) =
                    body.split_once('.')
                        .ok_or_else(|| CommandError::BadParameter {
                            index: 0,
                            detail: format!("field token '{}' must be moniker.field", body),
                        })?;
                let value = fields.read_field(moniker, field)?;
                out.push_str(&value.to_string());
            }
            i = close + 1;
        } else if let Some(ch) = text[i..].chars().next() {
            // Step over whole UTF-8 sequences, not bytes.
            out.push(ch);
            i += ch.len_utf8();
        } else {
            break;
        }
    }
    Ok(out)
}

/// Token-expand a working copy of a command config, honoring each slot's
/// kind. The stored program is never touched.
pub fn expand_config(
    config: &CommandConfig,
    vars: &VarScopes<'_>,
    fields: &dyn FieldProxy,
) -> CommandResult<CommandConfig> {
    let mut copy = config.clone();
    for param in &mut copy.params {
        if param.kind.expands() {
            param.value = expand_text(&param.value, vars, fields)?;
        }
    }
    Ok(copy)
}

/// Fluent builder that computes `If`/`Else` jump offsets from structured
/// begin/end calls.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    name: String,
    steps: Vec<Step>,
    open: Vec<OpenIf>,
    error: Option<ConfigError>,
}

#[derive(Debug)]
struct OpenIf {
    if_index: usize,
    else_index: Option<usize>,
}

impl ProgramBuilder {
    /// Start a builder for the named action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a comment step.
    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::new(Opcode::Comment(text.into())));
        self
    }

    /// Append a command step.
    pub fn cmd(mut self, config: CommandConfig) -> Self {
        self.steps.push(Step::new(Opcode::Cmd { config }));
        self
    }

    /// Mark the most recently appended step disabled.
    pub fn disabled(mut self) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.disabled = true;
        }
        self
    }

    /// Open an `If` region on the given conditional command.
    pub fn begin_if(self, config: CommandConfig) -> Self {
        self.push_if(config, false)
    }

    /// Open an `If` region whose branch decision is negated.
    pub fn begin_if_not(self, config: CommandConfig) -> Self {
        self.push_if(config, true)
    }

    fn push_if(mut self, config: CommandConfig, negate: bool) -> Self {
        self.open.push(OpenIf {
            if_index: self.steps.len(),
            else_index: None,
        });
        self.steps.push(Step::new(Opcode::If {
            jump: 0,
            negate,
            config,
        }));
        self
    }

    /// Switch the innermost open `If` region to its else branch.
    pub fn begin_else(mut self) -> Self {
        match self.open.last_mut() {
            Some(frame) if frame.else_index.is_none() => {
                frame.else_index = Some(self.steps.len());
                self.steps.push(Step::new(Opcode::Else { jump: 0 }));
            }
            Some(_) => {
                self.error
                    .get_or_insert(ConfigError::Unbalanced("second Else in one If".to_string()));
            }
            None => {
                self.error
                    .get_or_insert(ConfigError::Unbalanced("Else outside any If".to_string()));
            }
        }
        self
    }

    /// Close the innermost open `If` region, patching its jump offsets.
    pub fn end_if(mut self) -> Self {
        let Some(frame) = self.open.pop() else {
            self.error
                .get_or_insert(ConfigError::Unbalanced("End outside any If".to_string()));
            return self;
        };
        let end_index = self.steps.len();
        self.steps.push(Step::new(Opcode::End));

        let if_jump_to = frame.else_index.unwrap_or(end_index);
        if let Opcode::If { jump, .. } = &mut self.steps[frame.if_index].op {
            *jump = (if_jump_to - frame.if_index) as i32;
        }
        if let Some(else_index) = frame.else_index {
            if let Opcode::Else { jump } = &mut self.steps[else_index].op {
                *jump = (end_index - else_index) as i32;
            }
        }
        self
    }

    /// Finish the program, failing if control flow is unbalanced.
    pub fn build(self) -> ConfigResult<ActionProgram> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !self.open.is_empty() {
            return Err(ConfigError::Unbalanced(format!(
                "{} unclosed If region(s)",
                self.open.len()
            )));
        }
        let program = ActionProgram {
            name: self.name,
            steps: self.steps,
        };
        program.validate()?;
        Ok(program)
    }
}
