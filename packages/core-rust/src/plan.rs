//! Row-level classification and reassembly.
//!
//! A [`RowPlan`] is the pure part of reconciling one row: it classifies every
//! declared field, exposes the flattened candidate list for relocation, and
//! turns the relocation results into a [`RowRewrite`].

use serde_json::Value;

use crate::change::{row_changed, FieldChange};
use crate::classify::{classify, Candidate, ClassifiedField};
use crate::spec::TableSpec;
use crate::types::{RelocationResult, Row};

/// Every declared field of one row, classified.
#[derive(Debug, Clone)]
pub struct RowPlan {
    primary_key: Value,
    fields: Vec<ClassifiedField>,
}

/// New values for a row's declared fields, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRewrite {
    pub primary_key: Value,
    pub values: Vec<(String, Value)>,
    pub changes: Vec<FieldChange>,
}

impl RowRewrite {
    /// Whether any field changed; an unchanged row needs no write.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        row_changed(&self.changes)
    }

    /// Only the fields that changed.
    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| c.is_changed())
    }
}

impl RowPlan {
    /// Classifies every field `table` declares. Absent columns read as null.
    #[must_use]
    pub fn classify(table: &TableSpec, row: &Row) -> Self {
        let fields = table
            .fields
            .iter()
            .map(|field| classify(field, row.get(&field.name).unwrap_or(&Value::Null)))
            .collect();
        Self {
            primary_key: row.get(&table.primary_key).cloned().unwrap_or(Value::Null),
            fields,
        }
    }

    #[must_use]
    pub fn primary_key(&self) -> &Value {
        &self.primary_key
    }

    #[must_use]
    pub fn fields(&self) -> &[ClassifiedField] {
        &self.fields
    }

    /// All candidates of the row, field by field in declaration order.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.fields.iter().flat_map(|f| f.candidates.iter())
    }

    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.fields.iter().map(|f| f.candidates.len()).sum()
    }

    /// Folds `results` (parallel to [`Self::candidates`]) back into the row.
    #[must_use]
    pub fn reassemble(&self, results: &[RelocationResult]) -> RowRewrite {
        let mut offset = 0;
        let mut values = Vec::with_capacity(self.fields.len());
        let mut changes = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let end = (offset + field.candidates.len()).min(results.len());
            let own = results.get(offset.min(end)..end).unwrap_or_default();
            offset += field.candidates.len();

            let out = field.reassemble(own);
            values.push((out.name, out.value));
            changes.push(out.change);
        }

        RowRewrite {
            primary_key: self.primary_key.clone(),
            values,
            changes,
        }
    }
}
