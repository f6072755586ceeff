//! Persistent JSON document tree.
//!
//! [`Document`] mirrors the JSON data model, but its containers are held
//! behind `Arc`, so cloning a document is O(1) and a path replacement only
//! copies the containers on the replaced path. Every sibling subtree is
//! shared with the original.
//!
//! Object keys are kept in a `BTreeMap`, so re-serialized documents come out
//! with sorted keys. Numbers keep the digits they were parsed from
//! (`serde_json` is built with `arbitrary_precision`).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};

/// A node of a parsed JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number, kept as its source digits.
    Number(Number),
    /// JSON string.
    String(Arc<str>),
    /// JSON array.
    Array(Arc<Vec<Document>>),
    /// JSON object.
    Object(Arc<BTreeMap<String, Document>>),
}

impl Document {
    /// Parses a stored document text.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `text` is not valid JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }

    /// Serializes the document back to compact JSON text.
    #[must_use]
    pub fn to_text(&self) -> String {
        // Serializing a tree of plain JSON nodes into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the string payload if this node is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for arrays and objects.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// Returns `true` if both nodes are the same shared allocation.
    ///
    /// Scalars never share storage, so this is only meaningful for
    /// containers and strings.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::from(s),
            Value::Array(items) => {
                Self::Array(Arc::new(items.into_iter().map(Self::from).collect()))
            }
            Value::Object(map) => Self::Object(Arc::new(
                map.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            )),
        }
    }
}

impl From<&Document> for Value {
    fn from(doc: &Document) -> Self {
        match doc {
            Document::Null => Value::Null,
            Document::Bool(b) => Value::Bool(*b),
            Document::Number(n) => Value::Number(n.clone()),
            Document::String(s) => Value::String(s.to_string()),
            Document::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Document::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
