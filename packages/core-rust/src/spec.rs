//! Table and field declarations.
//!
//! A [`TableSpec`] names a table, its primary key, and the fields whose
//! values may reference external resources. Each [`TableFieldSpec`] declares
//! the field's [`FieldShape`] once; the shape alone decides how the stored
//! value is parsed and reassembled.
//!
//! The serde representation matches the `tables` section of the
//! configuration file:
//!
//! ```json
//! { "name": "posts", "primaryKey": "id", "filterQuery": "deleted_at is null",
//!   "fields": [ { "name": "photo" },
//!               { "name": "meta", "type": "json", "props": ["cover.url"] } ] }
//! ```

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::path::DotPath;

/// Pattern a string must match to be treated as a relocatable reference.
pub const DEFAULT_URL_PATTERN: &str = r"^https?://";

/// Errors found while validating table declarations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("table name is empty")]
    EmptyTableName,
    #[error("table `{table}` has an empty primary key")]
    EmptyPrimaryKey { table: String },
    #[error("table `{table}` declares no fields")]
    NoFields { table: String },
    #[error("table `{table}` declares field `{field}` more than once")]
    DuplicateField { table: String, field: String },
    #[error("table `{table}` field `{field}` is the primary key")]
    PrimaryKeyField { table: String, field: String },
    #[error("table `{table}` field `{field}` has shape {shape} but no paths")]
    MissingPaths {
        table: String,
        field: String,
        shape: FieldShape,
    },
    #[error("table `{table}` field `{field}` declares path `{path}` more than once")]
    DuplicatePath {
        table: String,
        field: String,
        path: String,
    },
    #[error("invalid url pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// ---------------------------------------------------------------------------
// FieldShape
// ---------------------------------------------------------------------------

/// Declared structural kind of a field's stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldShape {
    /// A string, or an array of strings.
    #[default]
    Scalar,
    /// A JSON document, stored as text or as a native JSON column.
    #[serde(alias = "text", alias = "jsonb")]
    Json,
    /// An array of JSON documents.
    #[serde(alias = "jsonArray", alias = "json[]")]
    JsonArray,
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Json => "json",
            Self::JsonArray => "json_array",
        })
    }
}

// ---------------------------------------------------------------------------
// UrlPattern
// ---------------------------------------------------------------------------

/// Compiled eligibility pattern for reference strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlPattern(Regex);

impl UrlPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidPattern`] if the regex does not compile.
    pub fn new(pattern: &str) -> Result<Self, SpecError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| SpecError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns `true` if `candidate` is eligible for relocation.
    #[must_use]
    pub fn is_match(&self, candidate: &str) -> bool {
        self.0.is_match(candidate)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for UrlPattern {
    fn default() -> Self {
        Self(Regex::new(DEFAULT_URL_PATTERN).unwrap_or_else(|_| unreachable!()))
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for UrlPattern {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<UrlPattern> for String {
    fn from(pattern: UrlPattern) -> Self {
        pattern.0.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// TableFieldSpec / TableSpec
// ---------------------------------------------------------------------------

/// One configured field of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFieldSpec {
    /// Column name.
    pub name: String,
    /// Declared shape of the stored value.
    #[serde(default, rename = "type")]
    pub shape: FieldShape,
    /// Dot-paths into the document; only read for `Json` and `JsonArray`.
    #[serde(default, rename = "props")]
    pub paths: Vec<DotPath>,
    /// Overrides [`DEFAULT_URL_PATTERN`] for this field.
    #[serde(default, rename = "searchRegex", skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<UrlPattern>,
}

impl TableFieldSpec {
    /// A `Scalar` field with the default pattern.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: FieldShape::Scalar,
            paths: Vec::new(),
            url_pattern: None,
        }
    }

    /// A `Json` or `JsonArray` field reading the given paths.
    #[must_use]
    pub fn document(name: impl Into<String>, shape: FieldShape, paths: Vec<DotPath>) -> Self {
        Self {
            name: name.into(),
            shape,
            paths,
            url_pattern: None,
        }
    }
}

/// One configured table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    /// Table name, optionally schema-qualified (`public.posts`).
    pub name: String,
    /// Primary key column; pages are ordered by it and write-back keys on it.
    pub primary_key: String,
    /// Fields to reconcile, in write-back order.
    pub fields: Vec<TableFieldSpec>,
    /// Optional SQL predicate restricting the scanned rows.
    #[serde(default, rename = "filterQuery", skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl TableSpec {
    /// Checks the declaration for the mistakes that would otherwise surface
    /// as SQL errors or silently ignored fields.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpecError`] found.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyTableName);
        }
        let table = || self.name.clone();
        if self.primary_key.trim().is_empty() {
            return Err(SpecError::EmptyPrimaryKey { table: table() });
        }
        if self.fields.is_empty() {
            return Err(SpecError::NoFields { table: table() });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SpecError::DuplicateField {
                    table: table(),
                    field: field.name.clone(),
                });
            }
            if field.name == self.primary_key {
                return Err(SpecError::PrimaryKeyField {
                    table: table(),
                    field: field.name.clone(),
                });
            }
            if field.shape != FieldShape::Scalar && field.paths.is_empty() {
                return Err(SpecError::MissingPaths {
                    table: table(),
                    field: field.name.clone(),
                    shape: field.shape,
                });
            }
            let mut paths = HashSet::new();
            if let Some(path) = field.paths.iter().find(|p| !paths.insert(*p)) {
                return Err(SpecError::DuplicatePath {
                    table: table(),
                    field: field.name.clone(),
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Names of the declared fields in write-back order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
