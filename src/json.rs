//! A small tagged-variant JSON value model.
//!
//! The wire format ([`crate::message::Message`] and the protocol body
//! types) is decoded directly through `serde_json`; this module exists
//! for call sites that need explicit integer-exactness checks and
//! pointer-style lookup — `crate::protocol`'s reverse-request argument
//! parsers (`RunInTerminalRequest::parse`, `StartDebuggingRequest::parse`)
//! and `parse_read_memory`'s `unreadableBytes` extraction use it instead
//! of `as_i64()` style guessing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as RawValue;

/// Tagged JSON value. Equality is structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the underlying value as an exact integer, iff the stored
    /// float is finite and has no fractional or out-of-range component.
    pub fn exact_int(&self) -> Option<i64> {
        match self {
            Value::Number(n) => {
                if !n.is_finite() {
                    return None;
                }
                let truncated = n.trunc();
                if truncated != *n {
                    return None;
                }
                if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
                    return None;
                }
                Some(truncated as i64)
            }
            _ => None,
        }
    }

    /// Looks up a nested value by `/`-separated path, `serde_json::Pointer`-style
    /// but array indices are plain decimal keys into `Array`.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.trim_start_matches('/').split('/') {
            current = match current {
                Value::Object(m) => m.get(segment)?,
                Value::Array(v) => v.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", RawValue::from(self.clone()))
    }
}

impl From<Value> for RawValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(RawValue::Number)
                .unwrap_or(RawValue::Null),
            Value::String(s) => RawValue::String(s),
            Value::Array(a) => RawValue::Array(a.into_iter().map(RawValue::from).collect()),
            Value::Object(m) => {
                RawValue::Object(m.into_iter().map(|(k, v)| (k, RawValue::from(v))).collect())
            }
        }
    }
}

impl From<RawValue> for Value {
    fn from(v: RawValue) -> Self {
        match v {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(b),
            RawValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            RawValue::String(s) => Value::String(s),
            RawValue::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            RawValue::Object(m) => {
                Value::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
