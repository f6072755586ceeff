//! Change detection between stored and reconciled values.
//!
//! A position is changed iff its new value differs from the old one. A field
//! is changed iff any of its positions changed, and a row iff any field did.

use std::fmt;

use crate::path::DotPath;

/// Location of a value inside a field: an optional element index (array
/// shapes) and an optional dot-path (document shapes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub index: Option<usize>,
    pub path: Option<DotPath>,
}

impl Position {
    /// The field value itself.
    pub const WHOLE: Self = Self {
        index: None,
        path: None,
    };

    #[must_use]
    pub fn at_index(index: usize) -> Self {
        Self {
            index: Some(index),
            path: None,
        }
    }

    #[must_use]
    pub fn at_path(index: Option<usize>, path: DotPath) -> Self {
        Self {
            index,
            path: Some(path),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.index, &self.path) {
            (None, None) => f.write_str("$"),
            (Some(i), None) => write!(f, "[{i}]"),
            (None, Some(p)) => write!(f, "{p}"),
            (Some(i), Some(p)) => write!(f, "[{i}].{p}"),
        }
    }
}

/// Returns `true` if `new` is not identical to `old`.
#[must_use]
pub fn position_changed(old: &str, new: &str) -> bool {
    old != new
}

/// Indices at which `new` differs from `old`.
///
/// Slots present in only one of the slices count as changed.
#[must_use]
pub fn diff_positions<T: PartialEq>(old: &[T], new: &[T]) -> Vec<usize> {
    let len = old.len().max(new.len());
    (0..len).filter(|&i| old.get(i) != new.get(i)).collect()
}

/// Positions of one field whose value changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldChange {
    pub field: String,
    pub changed_at: Vec<Position>,
}

impl FieldChange {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            changed_at: Vec::new(),
        }
    }

    /// Records `position` if the value there went from `old` to a different `new`.
    pub fn observe(&mut self, position: Position, old: &str, new: &str) {
        if position_changed(old, new) {
            self.changed_at.push(position);
        }
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.changed_at.is_empty()
    }
}

/// OR-accumulation of every field's change flag.
#[must_use]
pub fn row_changed<'a>(fields: impl IntoIterator<Item = &'a FieldChange>) -> bool {
    fields.into_iter().any(FieldChange::is_changed)
}
