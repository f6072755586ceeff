use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use rehost_core::{RelocationResult, Row, TableSpec};
use serde_json::Value;

/// Paged reads and per-row write-back against the relational store.
/// Implementations: `PostgreSQL`, memory (tests).
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch one page of `table`, ordered by its primary key.
    ///
    /// Each row carries the primary key and every declared field.
    async fn fetch_page(&self, table: &TableSpec, offset: u64, limit: u64)
        -> anyhow::Result<Vec<Row>>;

    /// Write the declared fields of one row, keyed by its primary key.
    ///
    /// `values` are in the table's declared field order. Returns the number
    /// of rows affected.
    async fn write_back(
        &self,
        table: &TableSpec,
        primary_key: &Value,
        values: &[(String, Value)],
    ) -> anyhow::Result<u64>;
}

/// Moves one referenced resource into the managed object store.
///
/// Never fails outward: every failure resolves to
/// [`RelocationResult::KeepOriginal`].
#[async_trait]
pub trait AssetRelocator: Send + Sync {
    async fn relocate(&self, url: &str) -> RelocationResult;
}

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// A single HTTP response, before any redirect handling.
pub struct FetchResponse {
    pub status: u16,
    /// Value of the `Location` header, if present.
    pub location: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Raw HTTP(S) transport. Must not follow redirects itself.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse>;
}

/// Access control applied to an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    PublicRead,
    Private,
}

impl ObjectAcl {
    /// Canned ACL header value.
    #[must_use]
    pub fn as_header(self) -> &'static str {
        match self {
            Self::PublicRead => "public-read",
            Self::Private => "private",
        }
    }
}

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Public URL of the object.
    pub location: String,
    /// Storage key inside the bucket.
    pub key: String,
}

/// Raw object-store transport.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
        acl: ObjectAcl,
    ) -> anyhow::Result<StoredObject>;
}
