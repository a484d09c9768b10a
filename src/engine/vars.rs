//! The two variable scopes and the scoped find-or-create lookup.
//!
//! Local scope is created fresh for each invocation and owned by it; global
//! scope is caller-owned, outlives invocations, and may be shared by several
//! concurrently running engines, so it lives behind a `parking_lot` lock.
//! Variables are created on first write (or read-with-create for output
//! parameters) and never implicitly deleted.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::trace::Tracer;
use crate::value::Value;

/// Errors surfaced by variable lookups.
#[derive(Debug, Clone, Error)]
pub enum VarError {
    /// Reference-only read of a variable that does not exist.
    #[error("variable '{0}' does not exist")]
    NotFound(String),

    /// A variable name was empty after stripping its scope prefix.
    #[error("empty variable name")]
    EmptyName,
}

/// Convenience result alias for variable operations.
pub type VarResult<T> = std::result::Result<T, VarError>;

/// Which scope a name selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// Per-invocation scope.
    Local,
    /// Caller-owned shared scope.
    Global,
}

/// Split a possibly-prefixed name into its scope and bare name.
///
/// `global:x` and `local:x` select explicitly; unprefixed names default to
/// local scope.
pub fn split_scoped(name: &str) -> (VarScope, &str) {
    if let Some(rest) = name.strip_prefix("global:") {
        (VarScope::Global, rest)
    } else if let Some(rest) = name.strip_prefix("local:") {
        (VarScope::Local, rest)
    } else {
        (VarScope::Local, name)
    }
}

/// Per-invocation variable store. Single-owner, no synchronization.
#[derive(Debug, Default)]
pub struct LocalVars {
    vars: HashMap<String, Value>,
}

impl LocalVars {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a variable, if present.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    /// Set (creating if needed) a variable.
    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Number of variables in the store.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Caller-owned shared variable store.
///
/// Cloning shares the underlying map; all access goes through the lock so
/// concurrently running invocations can read and write safely.
#[derive(Debug, Clone, Default)]
pub struct GlobalVars {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl GlobalVars {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a variable, if present.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().get(name).cloned()
    }

    /// Set (creating if needed) a variable.
    pub fn set(&self, name: &str, value: Value) {
        self.inner.write().insert(name.to_string(), value);
    }

    /// Number of variables in the store.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Scope-resolving view handed to executing commands.
///
/// All variable traffic during a run goes through this view so that every
/// write is reported to the tracer with its fully scoped name.
pub struct VarScopes<'a> {
    local: &'a mut LocalVars,
    global: &'a GlobalVars,
    tracer: &'a dyn Tracer,
}

impl<'a> VarScopes<'a> {
    /// Build a view over the invocation's scopes.
    pub fn new(local: &'a mut LocalVars, global: &'a GlobalVars, tracer: &'a dyn Tracer) -> Self {
        Self {
            local,
            global,
            tracer,
        }
    }

    /// Reference-only read. Absence is a hard error.
    pub fn read(&self, name: &str) -> VarResult<Value> {
        let (scope, bare) = split_scoped(name);
        if bare.is_empty() {
            return Err(VarError::EmptyName);
        }
        let found = match scope {
            VarScope::Local => self.local.get(bare),
            VarScope::Global => self.global.get(bare),
        };
        found.ok_or_else(|| VarError::NotFound(name.to_string()))
    }

    /// Find-or-create read used by output parameters: absent variables come
    /// into existence holding `default`.
    pub fn read_or_create(&mut self, name: &str, default: Value) -> VarResult<Value> {
        match self.read(name) {
            Ok(value) => Ok(value),
            Err(VarError::NotFound(_)) => {
                self.write(name, default.clone())?;
                Ok(default)
            }
            Err(err) => Err(err),
        }
    }

    /// Write (creating if needed) a variable and notify the tracer.
    pub fn write(&mut self, name: &str, value: Value) -> VarResult<()> {
        let (scope, bare) = split_scoped(name);
        if bare.is_empty() {
            return Err(VarError::EmptyName);
        }
        match scope {
            VarScope::Local => self.local.set(bare, value.clone()),
            VarScope::Global => self.global.set(bare, value.clone()),
        }
        self.tracer.var_written(name, &value);
        Ok(())
    }

    /// Whether a variable currently exists.
    pub fn exists(&self, name: &str) -> bool {
        self.read(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::trace::NullTracer;

    #[test]
    fn unprefixed_names_default_to_local() {
        assert_eq!(split_scoped("x"), (VarScope::Local, "x"));
        assert_eq!(split_scoped("local:x"), (VarScope::Local, "x"));
        assert_eq!(split_scoped("global:x"), (VarScope::Global, "x"));
    }

    #[test]
    fn reference_read_of_absent_variable_is_hard_error() {
        let mut local = LocalVars::new();
        let global = GlobalVars::new();
        let scopes = VarScopes::new(&mut local, &global, &NullTracer);
        assert!(matches!(scopes.read("missing"), Err(VarError::NotFound(_))));
    }

    #[test]
    fn read_or_create_materializes_outputs() {
        let mut local = LocalVars::new();
        let global = GlobalVars::new();
        let mut scopes = VarScopes::new(&mut local, &global, &NullTracer);
        let v = scopes
            .read_or_create("out", Value::String(String::new()))
            .unwrap();
        assert_eq!(v, Value::String(String::new()));
        assert!(scopes.exists("out"));
    }

    #[test]
    fn global_writes_are_visible_through_clones() {
        let global = GlobalVars::new();
        let shared = global.clone();
        let mut local = LocalVars::new();
        let mut scopes = VarScopes::new(&mut local, &global, &NullTracer);
        scopes.write("global:mode", Value::from("away")).unwrap();
        assert_eq!(shared.get("mode"), Some(Value::from("away")));
        assert!(local.is_empty());
    }
}
