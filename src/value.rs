//! Typed scalar values shared by the variable scopes, command parameters,
//! and the expression evaluator.
//!
//! Values carry the richest kind they are known to represent. When two
//! values meet in a comparison, a common kind is selected by walking the
//! widening order (`Time > Float > Int > Card > Boolean > String`, widest
//! first) down from the wider side until both sides convert; `String` is the
//! universal floor, so comparisons never fail on kind alone.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Error raised when a value cannot be converted to a required kind.
#[derive(Debug, Clone, Error)]
#[error("cannot convert '{value}' to {wanted}")]
pub struct ConvertError {
    /// Rendered form of the offending value.
    pub value: String,
    /// Kind the caller required.
    pub wanted: ValueKind,
}

/// Kind tag for a [`Value`], declared narrowest first so that `Ord` yields
/// the widening order directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    /// Arbitrary text; the universal fallback kind.
    String,
    /// True/false.
    Boolean,
    /// Unsigned integer.
    Card,
    /// Signed integer.
    Int,
    /// Double-precision float.
    Float,
    /// Absolute timestamp.
    Time,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "String",
            ValueKind::Boolean => "Boolean",
            ValueKind::Card => "Card",
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Time => "Time",
        };
        f.write_str(name)
    }
}

/// A typed scalar held in a variable or produced by a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// True/false.
    Boolean(bool),
    /// Unsigned integer.
    Card(u64),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Absolute timestamp (UTC).
    Time(DateTime<Utc>),
    /// Text.
    String(String),
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Card(_) => ValueKind::Card,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Time(_) => ValueKind::Time,
            Value::String(_) => ValueKind::String,
        }
    }

    /// Tag a raw literal with the richest kind it parses as.
    ///
    /// Narrower kinds are tried first so that `"10"` tags as `Card` while
    /// `"10.0"` tags as `Float` and `"-3"` as `Int`.
    pub fn tag_literal(text: &str) -> Value {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Boolean(false);
        }
        if let Ok(card) = trimmed.parse::<u64>() {
            return Value::Card(card);
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::Int(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            return Value::Float(float);
        }
        if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
            return Value::Time(time.with_timezone(&Utc));
        }
        Value::String(text.to_string())
    }

    /// Attempt to convert this value to the given kind, widening or
    /// reparsing as needed. Returns `None` when the conversion is lossy or
    /// the text does not parse.
    pub fn convert(&self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match kind {
            ValueKind::String => Some(Value::String(self.to_string())),
            ValueKind::Boolean => match self {
                Value::Card(c) => Some(Value::Boolean(*c != 0)),
                Value::Int(i) => Some(Value::Boolean(*i != 0)),
                Value::String(s) => {
                    let t = s.trim();
                    if t.eq_ignore_ascii_case("true") || t == "1" {
                        Some(Value::Boolean(true))
                    } else if t.eq_ignore_ascii_case("false") || t == "0" {
                        Some(Value::Boolean(false))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            ValueKind::Card => match self {
                Value::Boolean(b) => Some(Value::Card(u64::from(*b))),
                Value::Int(i) => u64::try_from(*i).ok().map(Value::Card),
                Value::String(s) => s.trim().parse::<u64>().ok().map(Value::Card),
                _ => None,
            },
            ValueKind::Int => match self {
                Value::Boolean(b) => Some(Value::Int(i64::from(*b))),
                Value::Card(c) => i64::try_from(*c).ok().map(Value::Int),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
                _ => None,
            },
            ValueKind::Float => match self {
                Value::Boolean(b) => Some(Value::Float(f64::from(u8::from(*b)))),
                Value::Card(c) => Some(Value::Float(*c as f64)),
                Value::Int(i) => Some(Value::Float(*i as f64)),
                Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
                _ => None,
            },
            ValueKind::Time => match self {
                Value::Card(c) => {
                    DateTime::<Utc>::from_timestamp(i64::try_from(*c).ok()?, 0).map(Value::Time)
                }
                Value::Int(i) => DateTime::<Utc>::from_timestamp(*i, 0).map(Value::Time),
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|t| Value::Time(t.with_timezone(&Utc))),
                _ => None,
            },
        }
    }

    /// Convert to the given kind or fail with a [`ConvertError`].
    ///
    /// Used where a command requires a specific kind (numeric parameters,
    /// timer slots); comparison coercion uses the fallback walk instead.
    pub fn require(&self, kind: ValueKind) -> Result<Value, ConvertError> {
        self.convert(kind).ok_or_else(|| ConvertError {
            value: self.to_string(),
            wanted: kind,
        })
    }

    /// Shorthand for `require(Card)` unwrapped to the primitive.
    pub fn as_card(&self) -> Result<u64, ConvertError> {
        match self.require(ValueKind::Card)? {
            Value::Card(c) => Ok(c),
            _ => unreachable!(),
        }
    }

    /// Shorthand for `require(Float)` unwrapped to the primitive.
    pub fn as_float(&self) -> Result<f64, ConvertError> {
        match self.require(ValueKind::Float)? {
            Value::Float(f) => Ok(f),
            _ => unreachable!(),
        }
    }

    /// Shorthand for `require(Boolean)` unwrapped to the primitive.
    pub fn as_bool(&self) -> Result<bool, ConvertError> {
        match self.require(ValueKind::Boolean)? {
            Value::Boolean(b) => Ok(b),
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Card(c) => write!(f, "{}", c),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Boolean(flag)
    }
}

impl From<u64> for Value {
    fn from(card: u64) -> Self {
        Value::Card(card)
    }
}

impl From<i64> for Value {
    fn from(int: i64) -> Self {
        Value::Int(int)
    }
}

impl From<f64> for Value {
    fn from(float: f64) -> Self {
        Value::Float(float)
    }
}

/// Widest kind both sides convert to, walking down from the wider side.
fn common_kind(a: &Value, b: &Value) -> ValueKind {
    const DESCENDING: [ValueKind; 6] = [
        ValueKind::Time,
        ValueKind::Float,
        ValueKind::Int,
        ValueKind::Card,
        ValueKind::Boolean,
        ValueKind::String,
    ];
    let widest = a.kind().max(b.kind());
    for kind in DESCENDING {
        if kind > widest {
            continue;
        }
        if a.convert(kind).is_some() && b.convert(kind).is_some() {
            return kind;
        }
    }
    ValueKind::String
}

/// Convert both sides to their common kind; `common_kind` guarantees this,
/// with rendered strings as the last resort.
fn coerce_pair(a: &Value, b: &Value) -> (Value, Value) {
    let kind = common_kind(a, b);
    match (a.convert(kind), b.convert(kind)) {
        (Some(ca), Some(cb)) => (ca, cb),
        _ => (
            Value::String(a.to_string()),
            Value::String(b.to_string()),
        ),
    }
}

/// Equality at the common kind. String equality is case-insensitive.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    let (a, b) = coerce_pair(a, b);
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Card(x), Value::Card(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(&y),
        _ => false,
    }
}

/// Ordering at the common kind. String ordering is case-sensitive lexical;
/// the asymmetry with [`values_equal`] is deliberate, inherited behavior.
pub fn values_cmp(a: &Value, b: &Value) -> Ordering {
    let (a, b) = coerce_pair(a, b);
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(&y),
        (Value::Card(x), Value::Card(y)) => x.cmp(&y),
        (Value::Int(x), Value::Int(y)) => x.cmp(&y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Value::Time(x), Value::Time(y)) => x.cmp(&y),
        (Value::String(x), Value::String(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    }
}
