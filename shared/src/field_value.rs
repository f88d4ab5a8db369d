//! Polymorphic field value.
//!
//! A field either holds a plain scalar (text, a number typed into a form, a
//! date) or a structured JSON document (multi-select lists, tables of
//! shareholders). Storage keeps them in two columns; everywhere else the
//! distinction lives in the type.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    Structured(JsonValue),
}

impl FieldValue {
    /// Normalize a raw JSON payload entry.
    ///
    /// Strings, numbers and booleans become scalars, arrays and objects become
    /// structured values. `null` carries no value and yields `None`.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(Self::Scalar(s)),
            JsonValue::Number(n) => Some(Self::Scalar(n.to_string())),
            JsonValue::Bool(b) => Some(Self::Scalar(b.to_string())),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Some(Self::Structured(other)),
        }
    }

    /// Rebuild from the storage column pair. Exactly one side is expected to
    /// be set; a scalar wins if both somehow are.
    pub fn from_columns(value: Option<String>, value_jsonb: Option<JsonValue>) -> Option<Self> {
        match (value, value_jsonb) {
            (Some(s), _) => Some(Self::Scalar(s)),
            (None, Some(json)) => Some(Self::Structured(json)),
            (None, None) => None,
        }
    }

    /// Split into the `(value, value_jsonb)` storage column pair.
    pub fn to_columns(&self) -> (Option<String>, Option<JsonValue>) {
        match self {
            Self::Scalar(s) => (Some(s.clone()), None),
            Self::Structured(json) => (None, Some(json.clone())),
        }
    }

    /// A value that a required field would not accept.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Scalar(s) => s.trim().is_empty(),
            Self::Structured(JsonValue::Array(items)) => items.is_empty(),
            Self::Structured(JsonValue::Object(map)) => map.is_empty(),
            Self::Structured(_) => false,
        }
    }
}
