//! Structured log records.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flattened, structured log record.
///
/// Keys keep their insertion order. Records are immutable once built: the
/// only way to "change" one is [`LogRecord::merged_with`], which returns a new
/// record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    /// Build a record from key/value pairs that are already flat.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parse a JSON object log message and flatten it.
    ///
    /// Nested objects become dotted keys (`{"user":{"id":1}}` -> `user.id`).
    /// Arrays are kept as their JSON text. Anything other than an object is
    /// rejected.
    pub fn from_json_str(message: &str) -> CoreResult<Self> {
        match serde_json::from_str::<Value>(message)? {
            Value::Object(map) => Ok(Self::flatten(map)),
            other => Err(CoreError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Flatten a possibly nested JSON object.
    pub fn flatten(map: Map<String, Value>) -> Self {
        let mut flat = Map::new();
        flatten_into(&mut flat, None, map);
        Self(flat)
    }

    /// Return a copy of this record with `key` set to `value`.
    ///
    /// An existing value under `key` is replaced.
    pub fn merged_with(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = self.0.clone();
        map.insert(key.to_string(), value.into());
        Self(map)
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `message` field, when it is a string.
    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    /// Iterate over fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: Map<String, Value>) {
    for (key, value) in map {
        let full_key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&full_key), inner),
            Value::Array(items) => {
                out.insert(full_key, Value::String(Value::Array(items).to_string()));
            }
            scalar => {
                out.insert(full_key, scalar);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
