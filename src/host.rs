//! Narrow interfaces to the engine's external collaborators.
//!
//! The engine never owns transport: device/field access, macro loading, and
//! scheduled-event mutation are supplied by the host through the traits in
//! this module. All methods return `anyhow::Result` so host implementations
//! can surface whatever error type their transport produces; the engine wraps
//! them at the command boundary.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::value::Value;

/// Cooperative cancellation flag observed by long-running wait commands.
///
/// Cloning shares the underlying flag. There is no hard preemption: a command
/// mid-execution runs to completion before the flag is observed at its next
/// sleep/poll point.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.
    pub fn request(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Readiness of a device driver as reported by the field proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Driver is loaded but not yet talking to its device.
    WaitConnect,
    /// Driver is connected and serving fields.
    Connected,
    /// Driver is not loaded or has failed.
    Offline,
}

/// How a field write should block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Queue the write and return.
    NoWait,
    /// Block until the driver acknowledges the write.
    Wait,
}

/// Remote device/field access.
///
/// Implementations handle their own synchronization; the proxy is shared
/// between the field target and the expression evaluator.
pub trait FieldProxy: Send + Sync {
    /// Read the current value of `moniker.field`.
    fn read_field(&self, moniker: &str, field: &str) -> anyhow::Result<Value>;

    /// Write a value to `moniker.field`.
    fn write_field(
        &self,
        moniker: &str,
        field: &str,
        value: &Value,
        mode: WaitMode,
    ) -> anyhow::Result<()>;

    /// Query the driver state for a moniker.
    fn driver_state(&self, moniker: &str) -> anyhow::Result<DriverState>;
}

/// Direction of a macro parameter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDir {
    /// Constant input; never copied back.
    In,
    /// Output; the macro fills it, the target copies it back.
    Out,
    /// Input and output.
    InOut,
}

/// One bound macro parameter.
#[derive(Debug, Clone)]
pub struct MacroParam {
    /// Current value, updated in place by the macro for Out/InOut.
    pub value: Value,
    /// Binding direction.
    pub dir: ParamDir,
}

/// A parsed, invocable external macro session.
pub trait LoadedMacro: Send {
    /// Invoke the macro's entry point with the bound parameters. Returns the
    /// macro's integer result code.
    fn invoke(&mut self, params: &mut [MacroParam]) -> anyhow::Result<i32>;

    /// Discard cached execution state so the next invoke starts fresh.
    fn reset(&mut self);
}

/// Remote macro loader/parser.
pub trait MacroLoader: Send {
    /// Parse the named macro and return an invocable session.
    fn load(&mut self, class_path: &str) -> anyhow::Result<Box<dyn LoadedMacro>>;
}

/// Remote scheduled/triggered-event store.
///
/// Events are keyed by a type-relative path plus an optimistic serial number;
/// each mutation returns the new serial.
pub trait EventStore: Send {
    /// Pause or resume the event at `path`.
    fn set_paused(&mut self, path: &str, serial: u32, paused: bool) -> anyhow::Result<u32>;

    /// Set the day/hour/minute of a scheduled event.
    fn set_scheduled_time(
        &mut self,
        path: &str,
        serial: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> anyhow::Result<u32>;

    /// Set the period mask and offset of a periodic event.
    fn set_period(&mut self, path: &str, serial: u32, mask: u32, offset: u32)
    -> anyhow::Result<u32>;
}

/// Macro loader for hosts without a macro engine; every load fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMacroLoader;

impl MacroLoader for NullMacroLoader {
    fn load(&mut self, class_path: &str) -> anyhow::Result<Box<dyn LoadedMacro>> {
        anyhow::bail!("no macro engine available to load '{}'", class_path)
    }
}

/// Event store for hosts without a scheduler; every mutation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventStore;

impl EventStore for NullEventStore {
    fn set_paused(&mut self, path: &str, _serial: u32, _paused: bool) -> anyhow::Result<u32> {
        anyhow::bail!("no event store available for '{}'", path)
    }

    fn set_scheduled_time(
        &mut self,
        path: &str,
        _serial: u32,
        _day: u32,
        _hour: u32,
        _minute: u32,
    ) -> anyhow::Result<u32> {
        anyhow::bail!("no event store available for '{}'", path)
    }

    fn set_period(
        &mut self,
        path: &str,
        _serial: u32,
        _mask: u32,
        _offset: u32,
    ) -> anyhow::Result<u32> {
        anyhow::bail!("no event store available for '{}'", path)
    }
}

/// In-memory field proxy used by the CLI and tests.
///
/// Fields live in a mutex-guarded map keyed by `moniker.field`; every driver
/// mentioned in the map reports [`DriverState::Connected`].
#[derive(Default)]
pub struct InMemoryFieldProxy {
    fields: Mutex<HashMap<String, Value>>,
}

impl InMemoryFieldProxy {
    /// Create an empty proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a field value, creating it if needed.
    pub fn set(&self, moniker: &str, field: &str, value: Value) {
        self.fields
            .lock()
            .insert(format!("{}.{}", moniker, field), value);
    }

    /// Fetch a field value, if present.
    pub fn get(&self, moniker: &str, field: &str) -> Option<Value> {
        self.fields
            .lock()
            .get(&format!("{}.{}", moniker, field))
            .cloned()
    }
}

impl FieldProxy for InMemoryFieldProxy {
    fn read_field(&self, moniker: &str, field: &str) -> anyhow::Result<Value> {
        self.get(moniker, field)
            .ok_or_else(|| anyhow::anyhow!("unknown field {}.{}", moniker, field))
    }

    fn write_field(
        &self,
        moniker: &str,
        field: &str,
        value: &Value,
        _mode: WaitMode,
    ) -> anyhow::Result<()> {
        let key = format!("{}.{}", moniker, field);
        let mut fields = self.fields.lock();
        if !fields.contains_key(&key) {
            anyhow::bail!("unknown field {}", key);
        }
        fields.insert(key, value.clone());
        Ok(())
    }

    fn driver_state(&self, moniker: &str) -> anyhow::Result<DriverState> {
        let prefix = format!("{}.", moniker);
        let known = self.fields.lock().keys().any(|k| k.starts_with(&prefix));
        Ok(if known {
            DriverState::Connected
        } else {
            DriverState::Offline
        })
    }
}
