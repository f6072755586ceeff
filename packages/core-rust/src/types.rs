use serde::{Deserialize, Serialize};

/// One fetched row: column name to raw stored value.
///
/// Values arrive as JSON from the relational boundary (`to_jsonb`), so a
/// text column is a JSON string, an array column is a JSON array, and a
/// native JSON column is the document itself.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of relocating a single candidate reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocationResult {
    /// The resource now lives at this reference.
    Relocated(String),
    /// Relocation failed or was skipped; the original reference stays.
    KeepOriginal,
}

impl RelocationResult {
    /// The reference to write back in place of `original`.
    #[must_use]
    pub fn resolve<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            Self::Relocated(new_reference) => new_reference,
            Self::KeepOriginal => original,
        }
    }

    #[must_use]
    pub fn is_relocated(&self) -> bool {
        matches!(self, Self::Relocated(_))
    }
}
