//! Per-row reconciliation: classify, relocate every candidate concurrently,
//! reassemble, and write back only when something changed.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use rehost_core::{Row, RowPlan, TableSpec};
use tracing::{debug, info_span, warn, Instrument};

use crate::traits::{AssetRelocator, RowStore};

/// How one row ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Nothing changed; no write was issued.
    Unchanged,
    /// The row was written back.
    Updated,
    /// The write failed or matched no row.
    Failed(String),
}

impl RowOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Updated => "updated",
            Self::Failed(_) => "failed",
        }
    }
}

/// Reconciles single rows against a store and a relocator.
#[derive(Clone)]
pub struct RowReconciler {
    store: Arc<dyn RowStore>,
    relocator: Arc<dyn AssetRelocator>,
    dry_run: bool,
}

impl std::fmt::Debug for RowReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReconciler")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl RowReconciler {
    #[must_use]
    pub fn new(store: Arc<dyn RowStore>, relocator: Arc<dyn AssetRelocator>) -> Self {
        Self {
            store,
            relocator,
            dry_run: false,
        }
    }

    /// In dry-run mode a changed row is logged instead of written.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Runs one row through classify, relocate, reassemble, and write-back.
    pub async fn reconcile(&self, table: &TableSpec, row: &Row) -> RowOutcome {
        let plan = RowPlan::classify(table, row);
        let span = info_span!(
            "row",
            table = %table.name,
            pk = %plan.primary_key(),
            candidates = plan.candidate_count(),
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );
        let start = Instant::now();
        let outcome = self.run(table, &plan).instrument(span.clone()).await;

        #[allow(clippy::cast_possible_truncation)]
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        span.record("outcome", outcome.as_str());
        outcome
    }

    async fn run(&self, table: &TableSpec, plan: &RowPlan) -> RowOutcome {
        let results = join_all(plan.candidates().map(|c| self.relocator.relocate(&c.url))).await;
        let rewrite = plan.reassemble(&results);

        if !rewrite.is_changed() {
            debug!("row unchanged");
            return RowOutcome::Unchanged;
        }
        for change in rewrite.changed_fields() {
            let positions: Vec<String> = change.changed_at.iter().map(ToString::to_string).collect();
            debug!(field = %change.field, positions = ?positions, "field changed");
        }

        if self.dry_run {
            debug!("dry run: skipping write");
            return RowOutcome::Updated;
        }

        match self
            .store
            .write_back(table, &rewrite.primary_key, &rewrite.values)
            .await
        {
            Ok(0) => {
                warn!("write-back matched no row");
                RowOutcome::Failed("no row matched the primary key".into())
            }
            Ok(_) => RowOutcome::Updated,
            Err(e) => {
                warn!(error = %e, "write-back failed");
                RowOutcome::Failed(format!("{e:#}"))
            }
        }
    }
}
