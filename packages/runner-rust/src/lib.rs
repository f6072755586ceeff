//! `rehost` runner: pages through configured tables, relocates externally
//! referenced assets into an S3-compatible bucket, and writes back the rows
//! whose references changed.
//!
//! The pure classification and reassembly logic lives in `rehost-core`; this
//! crate supplies the I/O behind the [`traits`] seams and the orchestration
//! around them.

pub mod config;
pub mod driver;
pub mod logging;
pub mod reconcile;
pub mod relocate;
pub mod shutdown;
pub mod storage;
pub mod traits;

pub use config::{AppConfig, BatchConfig, BucketConfig, ConfigError, ConnectionConfig, PagePolicy, RelocationConfig};
pub use driver::{DriverError, PageReport, RunReport, TableBatchDriver, TableReport};
pub use logging::{init_tracing, LogFormat};
pub use reconcile::{RowOutcome, RowReconciler};
pub use relocate::{DryRunRelocator, LocationRewrite, RelocateError, Relocator};
pub use shutdown::ShutdownController;
pub use storage::MemoryRowStore;
#[cfg(feature = "postgres")]
pub use storage::PostgresRowStore;
pub use traits::{AssetRelocator, FetchResponse, FetchTransport, ObjectAcl, ObjectStore, RowStore, StoredObject};
