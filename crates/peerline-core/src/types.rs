//! Core types shared between the signal server and its clients

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque peer identifier chosen by the client.
///
/// Not authenticated and not guaranteed unique; the server uses it purely
/// as a directory key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Advertised profile of a peer
///
/// Kept exactly as the client sent it. Only a string `name` attribute is
/// interpreted, by search; anything else (including a `name` of another
/// JSON type) is carried along untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(Value);

impl Default for Profile {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl Profile {
    pub fn named(name: impl Into<String>) -> Self {
        let mut attrs = Map::new();
        attrs.insert("name".into(), Value::String(name.into()));
        Self(Value::Object(attrs))
    }

    /// Display name, when the client sent one as a string
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Case-insensitive substring match against the display name.
    ///
    /// `needle` must already be lowercased. A profile without a string
    /// name only matches the empty needle.
    pub fn name_matches(&self, needle: &str) -> bool {
        self.name()
            .unwrap_or_default()
            .to_lowercase()
            .contains(needle)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Profile {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Loose truthiness of a client-supplied flag
///
/// `null`, `false`, `0`, `""` count as false; every other value, arrays
/// and objects included, counts as true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Deserialize any JSON value as a flag, using [`is_truthy`]
pub fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}
