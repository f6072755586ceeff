//! Dot-path resolution over [`Document`] trees.
//!
//! A [`DotPath`] such as `images.large.url` names a chain of nested
//! lookups. Object nodes are addressed by key; array nodes are addressed by
//! a decimal index component (`gallery.0.src`).
//!
//! [`replace`] rebuilds only the containers on the path and shares every
//! other subtree with its input, which is never modified.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Errors produced while parsing or applying a dot-path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("dot-path is empty")]
    Empty,
    #[error("dot-path `{path}` has an empty component at position {position}")]
    EmptyComponent { path: String, position: usize },
    #[error("dot-path `{path}` does not resolve in the document")]
    Unresolved { path: String },
}

/// A parsed, non-empty dot-separated property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DotPath {
    raw: String,
    components: Vec<String>,
}

impl DotPath {
    /// Parses `raw` by splitting on `.`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Empty`] for an empty string and
    /// [`PathError::EmptyComponent`] for paths like `a..b` or `.a`.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let components: Vec<String> = raw.split('.').map(str::to_string).collect();
        if let Some(position) = components.iter().position(String::is_empty) {
            return Err(PathError::EmptyComponent {
                path: raw.to_string(),
                position,
            });
        }
        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    /// The path components in lookup order.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The original dotted form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DotPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DotPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DotPath> for String {
    fn from(path: DotPath) -> Self {
        path.raw
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn array_index(component: &str) -> Option<usize> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    component.parse().ok()
}

fn child<'a>(node: &'a Document, component: &str) -> Option<&'a Document> {
    match node {
        Document::Object(entries) => entries.get(component),
        Document::Array(items) => array_index(component).and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Returns `true` if every component of `path` resolves inside `doc`.
#[must_use]
pub fn exists(doc: &Document, path: &DotPath) -> bool {
    read(doc, path).is_some()
}

/// Returns the node at `path`, or `None` as soon as a component is absent or
/// an intermediate node is not a container.
#[must_use]
pub fn read<'a>(doc: &'a Document, path: &DotPath) -> Option<&'a Document> {
    path.components()
        .iter()
        .try_fold(doc, |node, component| child(node, component))
}

/// Returns a new tree equal to `doc` except at `path`, which holds `value`.
///
/// Only the containers along `path` are copied; all siblings are shared
/// with `doc`.
///
/// # Errors
///
/// Returns [`PathError::Unresolved`] if `path` does not exist in `doc`.
pub fn replace(doc: &Document, path: &DotPath, value: Document) -> Result<Document, PathError> {
    replace_at(doc, path.components(), value).ok_or_else(|| PathError::Unresolved {
        path: path.to_string(),
    })
}

fn replace_at(node: &Document, components: &[String], value: Document) -> Option<Document> {
    let Some((head, rest)) = components.split_first() else {
        return Some(value);
    };
    match node {
        Document::Object(entries) => {
            let replaced = replace_at(entries.get(head)?, rest, value)?;
            let mut next = (**entries).clone();
            next.insert(head.clone(), replaced);
            Some(Document::Object(next.into()))
        }
        Document::Array(items) => {
            let index = array_index(head)?;
            let replaced = replace_at(items.get(index)?, rest, value)?;
            let mut next = (**items).clone();
            next[index] = replaced;
            Some(Document::Array(next.into()))
        }
        _ => None,
    }
}

/// Applies several replacements, each addressed against `original`, folding
/// them into one result so replacements at disjoint paths compose.
///
/// When two paths overlap, the later replacement wins at the shared prefix.
///
/// # Errors
///
/// Returns [`PathError::Unresolved`] for the first path that cannot be
/// applied to the accumulated document.
pub fn replace_all<'p, I>(original: &Document, replacements: I) -> Result<Document, PathError>
where
    I: IntoIterator<Item = (&'p DotPath, Document)>,
{
    replacements
        .into_iter()
        .try_fold(original.clone(), |acc, (path, value)| replace(&acc, path, value))
}
