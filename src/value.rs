// src/value.rs

//! The tagged value carried by an [`Entry`](crate::db::models::Entry).
//!
//! `Value` mirrors the four-way `type` column of the `entry` table: a
//! `null`-typed entry has no payload and stands for a deletion marker, while
//! `text`, `json`, and `blob` each populate exactly one payload slot.

use crate::error::{Error, Result};

/// A tagged payload written to a `(scope, key)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A deletion marker: this author's slot has been removed.
    Null,
    /// Plain UTF-8 text.
    Text(String),
    /// A JSON document, stored as its serialized text. Validated syntactically on write.
    Json(String),
    /// An opaque binary blob with a MIME type hint.
    Blob { mime_type: String, bytes: Vec<u8> },
}

/// Discriminant stored in `entry.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Text,
    Json,
    Blob,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Text => "text",
            ValueKind::Json => "json",
            ValueKind::Blob => "blob",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "null" => Ok(ValueKind::Null),
            "text" => Ok(ValueKind::Text),
            "json" => Ok(ValueKind::Json),
            "blob" => Ok(ValueKind::Blob),
            _ => Err(Error::Database(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown entry type {s:?}"),
                rusqlite::types::Type::Text,
            ))),
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Text(_) => ValueKind::Text,
            Value::Json(_) => ValueKind::Json,
            Value::Blob { .. } => ValueKind::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&str> {
        match self {
            Value::Json(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<(&str, &[u8])> {
        match self {
            Value::Blob { mime_type, bytes } => Some((mime_type, bytes)),
            _ => None,
        }
    }
}
