use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record as submitted by a caller or returned by a handler.
///
/// Backed by `serde_json::Map` with `preserve_order`, so iteration follows
/// the order in which keys were submitted. Validation and write modifiers
/// depend on that order.
pub type Record = serde_json::Map<String, Value>;

/// Runtime kind of a JSON value, used for `FieldRule` type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// JSON `true` / `false`.
    Boolean,
    /// JSON string (UTF-8).
    String,
    /// JSON number, integer or floating-point.
    Number,
    /// JSON object. Fields of this kind may declare a child schema.
    Object,
    /// JSON array.
    Array,
    /// JSON null.
    Null,
}

impl ValueKind {
    /// Classifies a JSON value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Lowercase name used in schema definitions and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Number => "number",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }

    /// Parses a kind from its lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(Self::Boolean),
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request intends to do with the record it carries.
///
/// Only `Create` and `Update` run the validation pipeline; defaults are
/// filled on `Create` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Update,
    Read,
    Delete,
}

impl Method {
    /// Maps an HTTP verb onto a pipeline method.
    ///
    /// `POST` creates, `PUT`/`PATCH` update, `DELETE` deletes and everything
    /// else is treated as a read.
    #[must_use]
    pub fn from_http(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "POST" => Self::Create,
            "PUT" | "PATCH" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Read,
        }
    }

    /// Whether the method may change stored state.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Read)
    }
}
