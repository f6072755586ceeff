//! Value classification and reassembly for a single field.
//!
//! [`classify`] dispatches once on the field's declared [`FieldShape`],
//! producing a [`ClassifiedField`]: the parsed [`FieldValue`] plus the list of
//! [`Candidate`] references eligible for relocation. After relocation,
//! [`ClassifiedField::reassemble`] folds the results back into a value of the
//! same stored form and reports which positions changed.

use serde_json::Value;

use crate::change::{diff_positions, FieldChange, Position};
use crate::document::Document;
use crate::path::{self, DotPath};
use crate::spec::{FieldShape, TableFieldSpec, UrlPattern};
use crate::types::RelocationResult;

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// How a document was stored, so it can be written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    /// Document text in a text column.
    Text,
    /// A native JSON column, already structured.
    Native,
}

/// One JSON document inside a `Json` or `JsonArray` field.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentField {
    /// A successfully parsed document.
    Parsed {
        original: Value,
        source: DocumentSource,
        document: Document,
    },
    /// A stored value that is not a readable document; passed through.
    Opaque(Value),
}

impl DocumentField {
    /// Reads a stored value as a document.
    ///
    /// Strings are parsed as document text; objects and arrays are native
    /// documents. Anything else, and unparsable text, is opaque.
    #[must_use]
    pub fn read(raw: &Value) -> Self {
        match raw {
            Value::String(text) => match Document::parse(text) {
                Ok(document) => Self::Parsed {
                    original: raw.clone(),
                    source: DocumentSource::Text,
                    document,
                },
                Err(e) => {
                    tracing::debug!(error = %e, "stored document text does not parse; passing through");
                    Self::Opaque(raw.clone())
                }
            },
            Value::Object(_) | Value::Array(_) => Self::Parsed {
                original: raw.clone(),
                source: DocumentSource::Native,
                document: Document::from(raw.clone()),
            },
            _ => Self::Opaque(raw.clone()),
        }
    }

    fn original(&self) -> &Value {
        match self {
            Self::Parsed { original, .. } | Self::Opaque(original) => original,
        }
    }

    fn candidates(
        &self,
        field: &str,
        index: Option<usize>,
        paths: &[DotPath],
        pattern: &UrlPattern,
        out: &mut Vec<Candidate>,
    ) {
        let Self::Parsed { document, .. } = self else {
            return;
        };
        for dot_path in paths {
            let Some(url) = path::read(document, dot_path).and_then(Document::as_str) else {
                continue;
            };
            if pattern.is_match(url) {
                out.push(Candidate {
                    field: field.to_string(),
                    position: Position::at_path(index, dot_path.clone()),
                    url: url.to_string(),
                });
            }
        }
    }

    /// Rebuilds the stored value with `replacements` applied.
    ///
    /// Returns the original value untouched when no replacement changes
    /// anything, so unchanged documents stay textually identical.
    fn reassemble(&self, replacements: &[(&Candidate, &RelocationResult)], change: &mut FieldChange) -> Value {
        let Self::Parsed {
            original,
            source,
            document,
        } = self
        else {
            return self.original().clone();
        };

        let mut updates = Vec::new();
        for (candidate, result) in replacements {
            let new_reference = result.resolve(&candidate.url);
            change.observe(candidate.position.clone(), &candidate.url, new_reference);
            if let Some(dot_path) = &candidate.position.path {
                if new_reference != candidate.url {
                    updates.push((dot_path, Document::from(new_reference)));
                }
            }
        }
        if updates.is_empty() {
            return original.clone();
        }

        match path::replace_all(document, updates) {
            Ok(rebuilt) => match source {
                DocumentSource::Text => Value::String(rebuilt.to_text()),
                DocumentSource::Native => Value::from(&rebuilt),
            },
            Err(e) => {
                // Candidates are read from this same document, so every path resolves.
                tracing::warn!(error = %e, "document replacement failed; keeping stored value");
                original.clone()
            }
        }
    }
}

/// A field's stored value, interpreted through its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `Scalar` shape holding a single value.
    Scalar(Value),
    /// `Scalar` shape holding an array.
    ScalarArray(Vec<Value>),
    /// `Json` shape.
    Document(DocumentField),
    /// `JsonArray` shape holding an array.
    DocumentArray(Vec<DocumentField>),
    /// `JsonArray` shape holding something other than an array.
    Untouched(Value),
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A located reference eligible for relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub field: String,
    pub position: Position,
    pub url: String,
}

/// A field after classification: its interpreted value and candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedField {
    pub name: String,
    pub value: FieldValue,
    pub candidates: Vec<Candidate>,
}

/// A field after reassembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledField {
    pub name: String,
    pub value: Value,
    pub change: FieldChange,
}

/// Interprets `raw` through `spec.shape` and collects its candidates.
#[must_use]
pub fn classify(spec: &TableFieldSpec, raw: &Value) -> ClassifiedField {
    let default_pattern = UrlPattern::default();
    let pattern = spec.url_pattern.as_ref().unwrap_or(&default_pattern);
    let name = spec.name.as_str();
    let mut candidates = Vec::new();

    let value = match spec.shape {
        FieldShape::Scalar => match raw {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if let Some(url) = item.as_str().filter(|s| pattern.is_match(s)) {
                        candidates.push(Candidate {
                            field: name.to_string(),
                            position: Position::at_index(index),
                            url: url.to_string(),
                        });
                    }
                }
                FieldValue::ScalarArray(items.clone())
            }
            _ => {
                if let Some(url) = raw.as_str().filter(|s| pattern.is_match(s)) {
                    candidates.push(Candidate {
                        field: name.to_string(),
                        position: Position::WHOLE,
                        url: url.to_string(),
                    });
                }
                FieldValue::Scalar(raw.clone())
            }
        },
        FieldShape::Json => {
            let doc = DocumentField::read(raw);
            doc.candidates(name, None, &spec.paths, pattern, &mut candidates);
            FieldValue::Document(doc)
        }
        FieldShape::JsonArray => match raw {
            Value::Array(items) => {
                let docs: Vec<DocumentField> = items.iter().map(DocumentField::read).collect();
                for (index, doc) in docs.iter().enumerate() {
                    doc.candidates(name, Some(index), &spec.paths, pattern, &mut candidates);
                }
                FieldValue::DocumentArray(docs)
            }
            _ => FieldValue::Untouched(raw.clone()),
        },
    };

    ClassifiedField {
        name: name.to_string(),
        value,
        candidates,
    }
}

impl ClassifiedField {
    /// Folds relocation results back into the field.
    ///
    /// `results` is parallel to `self.candidates`; missing trailing results
    /// are treated as [`RelocationResult::KeepOriginal`].
    #[must_use]
    pub fn reassemble(&self, results: &[RelocationResult]) -> ReassembledField {
        let keep = RelocationResult::KeepOriginal;
        let pairs: Vec<(&Candidate, &RelocationResult)> = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c, results.get(i).unwrap_or(&keep)))
            .collect();
        let mut change = FieldChange::new(self.name.clone());

        let value = match &self.value {
            FieldValue::Scalar(raw) => match pairs.first() {
                Some((candidate, result)) => {
                    let new_reference = result.resolve(&candidate.url);
                    change.observe(Position::WHOLE, &candidate.url, new_reference);
                    Value::String(new_reference.to_string())
                }
                None => raw.clone(),
            },
            FieldValue::ScalarArray(items) => {
                let mut rebuilt = items.clone();
                for (candidate, result) in &pairs {
                    if let Some(slot) = candidate.position.index.and_then(|i| rebuilt.get_mut(i)) {
                        *slot = Value::String(result.resolve(&candidate.url).to_string());
                    }
                }
                change
                    .changed_at
                    .extend(diff_positions(items, &rebuilt).into_iter().map(Position::at_index));
                Value::Array(rebuilt)
            }
            FieldValue::Document(doc) => doc.reassemble(&pairs, &mut change),
            FieldValue::DocumentArray(docs) => Value::Array(
                docs.iter()
                    .enumerate()
                    .map(|(index, doc)| {
                        let own: Vec<_> = pairs
                            .iter()
                            .filter(|(c, _)| c.position.index == Some(index))
                            .copied()
                            .collect();
                        doc.reassemble(&own, &mut change)
                    })
                    .collect(),
            ),
            FieldValue::Untouched(raw) => raw.clone(),
        };

        ReassembledField {
            name: self.name.clone(),
            value,
            change,
        }
    }
}
