//! `rehost` core: field shapes, dot-path documents, URL classification, and
//! change detection for relocating externally referenced assets.
//!
//! Everything in this crate is pure: no I/O, no async. The runner crate
//! drives it with real rows and a real relocator.

pub mod change;
pub mod classify;
pub mod document;
pub mod path;
pub mod plan;
pub mod spec;
pub mod types;

pub use change::{diff_positions, FieldChange, Position};
pub use classify::{classify, Candidate, ClassifiedField, DocumentField, FieldValue};
pub use document::Document;
pub use path::{DotPath, PathError};
pub use plan::{RowPlan, RowRewrite};
pub use spec::{FieldShape, SpecError, TableFieldSpec, TableSpec, UrlPattern};
pub use types::{RelocationResult, Row};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
