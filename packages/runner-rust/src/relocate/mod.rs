//! Asset relocation: download a referenced resource, store it in the
//! object store, and return its new location.
//!
//! [`Relocator`] never fails outward. Any fetch or store error is logged and
//! resolves to [`RelocationResult::KeepOriginal`], so the caller writes the
//! original reference back unchanged.

pub mod fetch;
pub mod rewrite;
pub mod s3;
pub mod temp;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rehost_core::RelocationResult;
use tracing::{debug, info, warn, Instrument};

pub use fetch::{fetch_to_file, FetchError, HttpFetcher};
pub use rewrite::LocationRewrite;
pub use s3::{S3Store, SigV4, StoreError};
pub use temp::{temp_file_name, TempFile};

use crate::config::{AppConfig, RelocationConfig};
use crate::traits::{AssetRelocator, FetchTransport, ObjectAcl, ObjectStore};

/// Why a single relocation fell back to the original reference.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("store failed: {0:#}")]
    Store(anyhow::Error),
}

/// Download-then-upload relocator.
pub struct Relocator {
    fetcher: Arc<dyn FetchTransport>,
    store: Arc<dyn ObjectStore>,
    rewrite: LocationRewrite,
    settings: RelocationConfig,
}

impl std::fmt::Debug for Relocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relocator")
            .field("rewrite", &self.rewrite)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Relocator {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn FetchTransport>,
        store: Arc<dyn ObjectStore>,
        rewrite: LocationRewrite,
        settings: RelocationConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            rewrite,
            settings,
        }
    }

    /// Builds the HTTP fetcher and S3 store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket endpoint is invalid or an HTTP client
    /// cannot be built.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let timeout = config.relocation.request_timeout();
        let fetcher = HttpFetcher::new(timeout)?;
        let store = S3Store::new(&config.bucket, timeout)?;
        Ok(Self::new(
            Arc::new(fetcher),
            Arc::new(store),
            LocationRewrite::from_bucket(&config.bucket),
            config.relocation.clone(),
        ))
    }

    /// Creates the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        Ok(())
    }

    /// Runs fetch then store for `url`, returning the rewritten location.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError`] if either phase fails. The temporary file
    /// is removed in every case.
    pub async fn try_relocate(&self, url: &str) -> Result<String, RelocateError> {
        let name = temp_file_name(url, self.settings.file_name_max_len);
        let file = TempFile::new(&self.settings.temp_dir, &name);

        let bytes = match fetch_to_file(self.fetcher.as_ref(), url, self.settings.max_redirects, &file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                file.remove().await;
                return Err(e.into());
            }
        };
        debug!(url, bytes, path = %file.path().display(), "downloaded");

        let content_type = mime_guess::from_path(file.key()).first_raw();
        let stored = self
            .store
            .put_file(file.key(), file.path(), content_type, ObjectAcl::PublicRead)
            .await;
        file.remove().await;

        let stored = stored.map_err(RelocateError::Store)?;
        Ok(self.rewrite.apply(&stored.location))
    }
}

#[async_trait]
impl AssetRelocator for Relocator {
    async fn relocate(&self, url: &str) -> RelocationResult {
        let span = tracing::info_span!(
            "relocate",
            url,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );
        let start = Instant::now();
        let result = self.try_relocate(url).instrument(span.clone()).await;
        #[allow(clippy::cast_possible_truncation)]
        span.record("duration_ms", start.elapsed().as_millis() as u64);

        match result {
            Ok(location) => {
                span.record("outcome", "relocated");
                info!(parent: &span, url, location = %location, "relocated");
                RelocationResult::Relocated(location)
            }
            Err(e) => {
                span.record("outcome", "kept");
                warn!(parent: &span, url, error = %e, "relocation failed, keeping original");
                RelocationResult::KeepOriginal
            }
        }
    }
}

/// Scheme of the placeholder locations produced by [`DryRunRelocator`].
pub const DRY_RUN_SCHEME: &str = "dry-run:";

/// Relocator for dry runs: nothing is fetched or stored. Each candidate
/// resolves to a `dry-run:` placeholder, so rows that would change are
/// reported as changed. Pair it with [`RowReconciler::with_dry_run`] so
/// placeholders are never written.
///
/// [`RowReconciler::with_dry_run`]: crate::reconcile::RowReconciler::with_dry_run
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRelocator;

#[async_trait]
impl AssetRelocator for DryRunRelocator {
    async fn relocate(&self, url: &str) -> RelocationResult {
        info!(url, "dry run: would relocate");
        RelocationResult::Relocated(format!("{DRY_RUN_SCHEME}{url}"))
    }
}
