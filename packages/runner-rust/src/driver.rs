//! Table batch driver: pages through each configured table in primary-key
//! order and reconciles the rows of a page concurrently.
//!
//! Pages are strictly sequential. Page N+1 is fetched only after every row
//! of page N has finished, which bounds concurrency by the page size. A
//! page-query failure is handled by the configured [`PagePolicy`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use rehost_core::{Row, TableSpec};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{BatchConfig, PagePolicy};
use crate::reconcile::{RowOutcome, RowReconciler};
use crate::shutdown::ShutdownController;

/// Base delay between page retries; attempt `n` waits `n` times this.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Why a table stopped before its last page.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("page at offset {offset} of {table} failed: {source:#}")]
    PageFailed {
        table: String,
        offset: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("{table}: {failures} consecutive page failures, last at offset {offset}")]
    TooManyPageFailures {
        table: String,
        offset: u64,
        failures: u32,
    },
    #[error("table `{0}` is not configured")]
    UnknownTable(String),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Row counts for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub offset: u64,
    pub attempted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl PageReport {
    fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Unchanged => self.unchanged += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Aggregate for one table.
#[derive(Debug, Default, Serialize)]
pub struct TableReport {
    pub table: String,
    pub pages: u64,
    pub pages_failed: u64,
    pub attempted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    /// Pagination stopped because shutdown was requested.
    pub interrupted: bool,
    /// Set when the table stopped on a page failure.
    #[serde(serialize_with = "error_text")]
    pub error: Option<DriverError>,
}

fn error_text<S: serde::Serializer>(error: &Option<DriverError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    fn absorb(&mut self, page: &PageReport) {
        self.pages += 1;
        self.attempted += page.attempted;
        self.updated += page.updated;
        self.unchanged += page.unchanged;
        self.failed += page.failed;
    }

    #[must_use]
    pub fn aborted(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate for a whole run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
}

impl RunReport {
    #[must_use]
    pub fn any_aborted(&self) -> bool {
        self.tables.iter().any(TableReport::aborted)
    }

    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.tables.iter().map(|t| t.attempted).sum()
    }

    #[must_use]
    pub fn updated(&self) -> u64 {
        self.tables.iter().map(|t| t.updated).sum()
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }
}

// ---------------------------------------------------------------------------
// TableBatchDriver
// ---------------------------------------------------------------------------

/// Drives [`RowReconciler`] over every page of every table.
#[derive(Debug)]
pub struct TableBatchDriver {
    reconciler: RowReconciler,
    batch: BatchConfig,
    shutdown: Arc<ShutdownController>,
}

impl TableBatchDriver {
    #[must_use]
    pub fn new(reconciler: RowReconciler, batch: BatchConfig, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            reconciler,
            batch,
            shutdown,
        }
    }

    /// Runs `tables` in order, restricted to `only` when it is non-empty.
    ///
    /// A table that stops on a page failure is recorded in its report and
    /// the remaining tables still run.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownTable`] if `only` names a table that is
    /// not configured.
    pub async fn run_all(&self, tables: &[TableSpec], only: &[String]) -> Result<RunReport, DriverError> {
        if let Some(unknown) = only.iter().find(|name| !tables.iter().any(|t| &t.name == *name)) {
            return Err(DriverError::UnknownTable(unknown.clone()));
        }

        let mut report = RunReport::default();
        for table in tables {
            if !only.is_empty() && !only.contains(&table.name) {
                continue;
            }
            if self.shutdown.is_shutdown_requested() {
                info!(table = %table.name, "shutdown requested, not starting table");
                break;
            }
            report.tables.push(self.run_table(Arc::new(table.clone())).await);
        }
        Ok(report)
    }

    /// Pages through one table until an empty page, a stopping failure, or
    /// shutdown.
    pub async fn run_table(&self, table: Arc<TableSpec>) -> TableReport {
        let mut report = TableReport::new(&table.name);
        let page_size = self.batch.page_size.max(1);
        let mut offset = 0;
        let mut consecutive_failures = 0;

        info!(table = %table.name, page_size, policy = ?self.batch.page_policy, "table started");
        loop {
            if self.shutdown.is_shutdown_requested() {
                warn!(table = %table.name, offset, "shutdown requested, stopping pagination");
                report.interrupted = true;
                break;
            }

            let rows = match self.fetch_page(&table, offset, page_size).await {
                Ok(rows) => {
                    consecutive_failures = 0;
                    rows
                }
                Err(_) if self.shutdown.is_shutdown_requested() => {
                    warn!(table = %table.name, offset, "shutdown requested during page retry");
                    report.interrupted = true;
                    break;
                }
                Err(source) => {
                    report.pages_failed += 1;
                    error!(table = %table.name, offset, error = %format!("{source:#}"), "page query failed");
                    if self.batch.page_policy != PagePolicy::Skip {
                        report.error = Some(DriverError::PageFailed {
                            table: table.name.clone(),
                            offset,
                            source,
                        });
                        break;
                    }
                    consecutive_failures += 1;
                    if consecutive_failures >= self.batch.max_consecutive_page_failures {
                        report.error = Some(DriverError::TooManyPageFailures {
                            table: table.name.clone(),
                            offset,
                            failures: consecutive_failures,
                        });
                        break;
                    }
                    offset += page_size;
                    continue;
                }
            };

            if rows.is_empty() {
                break;
            }
            let page = self.run_page(&table, offset, rows).await;
            report.absorb(&page);
            offset += page_size;
        }

        info!(
            table = %table.name,
            pages = report.pages,
            pages_failed = report.pages_failed,
            attempted = report.attempted,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "table finished"
        );
        report
    }

    /// One page query, retried under [`PagePolicy::Retry`]. A stop request
    /// ends the backoff early and returns the last error.
    async fn fetch_page(&self, table: &TableSpec, offset: u64, limit: u64) -> anyhow::Result<Vec<Row>> {
        let attempts = match self.batch.page_policy {
            PagePolicy::Retry => self.batch.page_retries + 1,
            PagePolicy::Skip | PagePolicy::Abort => 1,
        };
        let store = self.reconciler.store();
        let mut attempt = 1;
        loop {
            match store.fetch_page(table, offset, limit).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < attempts => {
                    warn!(table = %table.name, offset, attempt, error = %e, "page query failed, retrying");
                    tokio::select! {
                        () = tokio::time::sleep(RETRY_BACKOFF * attempt) => {}
                        () = self.shutdown.requested() => return Err(e),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reconciles every row of a page concurrently and waits for all of them.
    async fn run_page(&self, table: &Arc<TableSpec>, offset: u64, rows: Vec<Row>) -> PageReport {
        let span = info_span!(
            "page",
            table = %table.name,
            offset,
            rows = rows.len(),
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );
        let start = Instant::now();

        let page = async {
            let mut page = PageReport {
                offset,
                attempted: rows.len() as u64,
                ..PageReport::default()
            };
            let mut set = JoinSet::new();
            for row in rows {
                let reconciler = self.reconciler.clone();
                let table = Arc::clone(table);
                set.spawn(async move { reconciler.reconcile(&table, &row).await });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => page.record(&outcome),
                    Err(e) => {
                        error!(error = %e, "row task aborted");
                        page.failed += 1;
                    }
                }
            }
            page
        }
        .instrument(span.clone())
        .await;

        #[allow(clippy::cast_possible_truncation)]
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        span.record("outcome", if page.failed == 0 { "ok" } else { "partial" });
        info!(
            parent: &span,
            attempted = page.attempted,
            updated = page.updated,
            unchanged = page.unchanged,
            failed = page.failed,
            "page complete"
        );
        page
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rehost_core::{RelocationResult, TableFieldSpec};
    use serde_json::{json, Value};

    use super::*;
    use crate::storage::MemoryRowStore;
    use crate::traits::AssetRelocator;

    struct CdnRelocator;

    #[async_trait]
    impl AssetRelocator for CdnRelocator {
        async fn relocate(&self, url: &str) -> RelocationResult {
            if url.contains("panic") {
                panic!("relocator bug");
            }
            let name = url.rsplit('/').next().unwrap_or_default();
            RelocationResult::Relocated(format!("https://cdn.new/{name}"))
        }
    }

    fn table(name: &str) -> TableSpec {
        TableSpec {
            name: name.into(),
            primary_key: "id".into(),
            fields: vec![TableFieldSpec::scalar("photo")],
            filter: None,
        }
    }

    fn rows(count: u64) -> Vec<Row> {
        (1..=count)
            .map(|id| match json!({"id": id, "photo": format!("http://old/{id}.jpg")}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    fn driver(store: &Arc<MemoryRowStore>, batch: BatchConfig) -> TableBatchDriver {
        let reconciler = RowReconciler::new(store.clone(), Arc::new(CdnRelocator));
        TableBatchDriver::new(reconciler, batch, Arc::new(ShutdownController::new()))
    }

    fn batch(page_size: u64, page_policy: PagePolicy) -> BatchConfig {
        BatchConfig {
            page_size,
            page_policy,
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn pages_until_empty_and_updates_every_row() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(5));
        let report = driver(&store, batch(2, PagePolicy::Skip))
            .run_table(Arc::new(table("posts")))
            .await;

        assert_eq!(store.fetched_offsets("posts"), [0, 2, 4, 6]);
        assert_eq!(report.pages, 3);
        assert_eq!(report.attempted, 5);
        assert_eq!(report.updated, 5);
        assert!(!report.aborted());
        assert!(store
            .rows("posts")
            .iter()
            .all(|r| r["photo"].as_str().unwrap().starts_with("https://cdn.new/")));
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(3));
        let d = driver(&store, batch(10, PagePolicy::Skip));
        d.run_table(Arc::new(table("posts"))).await;
        let writes = store.writes().len();

        let again = d.run_table(Arc::new(table("posts"))).await;
        assert_eq!(again.unchanged, 3);
        assert_eq!(store.writes().len(), writes);
    }

    #[tokio::test]
    async fn skip_policy_moves_past_failed_page() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(4));
        store.fail_page("posts", 0, 1);
        let report = driver(&store, batch(2, PagePolicy::Skip))
            .run_table(Arc::new(table("posts")))
            .await;

        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.attempted, 2);
        assert!(!report.aborted());
        assert_eq!(store.rows("posts")[0]["photo"], json!("http://old/1.jpg"));
    }

    #[tokio::test]
    async fn skip_policy_gives_up_after_consecutive_failures() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(1));
        for offset in [0, 1, 2] {
            store.fail_page("posts", offset, 1);
        }
        let report = driver(&store, batch(1, PagePolicy::Skip))
            .run_table(Arc::new(table("posts")))
            .await;

        assert!(matches!(
            report.error,
            Some(DriverError::TooManyPageFailures { failures: 3, .. })
        ));
        assert_eq!(store.fetched_offsets("posts"), [0, 1, 2]);
    }

    #[tokio::test]
    async fn abort_policy_stops_table() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(4));
        store.fail_page("posts", 2, 1);
        let report = driver(&store, batch(2, PagePolicy::Abort))
            .run_table(Arc::new(table("posts")))
            .await;

        assert!(matches!(report.error, Some(DriverError::PageFailed { offset: 2, .. })));
        assert_eq!(report.updated, 2);
        assert_eq!(store.fetched_offsets("posts"), [0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_recovers_transient_failure() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(2));
        store.fail_page("posts", 0, 2);
        let report = driver(&store, batch(5, PagePolicy::Retry))
            .run_table(Arc::new(table("posts")))
            .await;

        assert!(!report.aborted());
        assert_eq!(report.updated, 2);
        assert_eq!(store.fetched_offsets("posts"), [0, 0, 0, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_aborts_when_retries_run_out() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(2));
        store.fail_page("posts", 0, 10);
        let report = driver(&store, batch(5, PagePolicy::Retry))
            .run_table(Arc::new(table("posts")))
            .await;

        assert!(matches!(report.error, Some(DriverError::PageFailed { .. })));
        assert_eq!(store.fetched_offsets("posts").len(), 4);
    }

    /// Completes only when `n` relocations are waiting at the same time.
    struct GatedRelocator {
        gate: tokio::sync::Barrier,
    }

    #[async_trait]
    impl AssetRelocator for GatedRelocator {
        async fn relocate(&self, url: &str) -> RelocationResult {
            self.gate.wait().await;
            CdnRelocator.relocate(url).await
        }
    }

    #[tokio::test]
    async fn rows_of_a_page_run_concurrently() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(3));
        let reconciler = RowReconciler::new(
            store.clone(),
            Arc::new(GatedRelocator {
                gate: tokio::sync::Barrier::new(3),
            }),
        );
        let d = TableBatchDriver::new(reconciler, batch(3, PagePolicy::Skip), Arc::new(ShutdownController::new()));

        let report = tokio::time::timeout(Duration::from_secs(5), d.run_table(Arc::new(table("posts"))))
            .await
            .expect("rows of the page were reconciled one at a time");
        assert_eq!(report.updated, 3);
    }

    #[tokio::test]
    async fn panicking_row_is_isolated() {
        let store = Arc::new(MemoryRowStore::new());
        let mut page = rows(2);
        page[1].insert("photo".into(), json!("http://old/panic.jpg"));
        store.insert("posts", "id", page);
        let report = driver(&store, batch(10, PagePolicy::Skip))
            .run_table(Arc::new(table("posts")))
            .await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_page() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(4));
        let d = driver(&store, batch(2, PagePolicy::Skip));
        d.shutdown.trigger_shutdown();

        let report = d.run_table(Arc::new(table("posts"))).await;
        assert!(report.interrupted);
        assert!(store.fetched_offsets("posts").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_retry_backoff_short() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("posts", "id", rows(2));
        store.fail_page("posts", 0, 10);
        let d = driver(&store, batch(5, PagePolicy::Retry));
        let shutdown = Arc::clone(&d.shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.trigger_shutdown();
        });

        let report = d.run_table(Arc::new(table("posts"))).await;
        assert!(report.interrupted);
        assert!(!report.aborted());
        assert_eq!(store.fetched_offsets("posts"), [0]);
    }

    #[tokio::test]
    async fn run_all_continues_after_aborted_table_and_honours_filter() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("a", "id", rows(1));
        store.insert("b", "id", rows(1));
        store.insert("c", "id", rows(1));
        store.fail_page("a", 0, 1);
        let d = driver(&store, batch(10, PagePolicy::Abort));
        let tables = [table("a"), table("b"), table("c")];

        let report = d.run_all(&tables, &[]).await.unwrap();
        assert_eq!(report.tables.len(), 3);
        assert!(report.any_aborted());
        assert_eq!(report.updated(), 2);

        let report = d.run_all(&tables, &["c".to_string()]).await.unwrap();
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].table, "c");

        assert!(matches!(
            d.run_all(&tables, &["nope".to_string()]).await,
            Err(DriverError::UnknownTable(name)) if name == "nope"
        ));
    }
}
