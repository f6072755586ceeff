//! In-memory [`RowStore`] for tests and local experiments.
//!
//! Rows are kept per table and served in primary-key order. Table filters
//! are SQL and are ignored here. Page and write failures can be injected to
//! exercise the driver's failure handling.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rehost_core::{Row, TableSpec};
use serde_json::Value;

use crate::traits::RowStore;

/// One recorded `write_back` call.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub table: String,
    pub primary_key: Value,
    pub values: Vec<(String, Value)>,
}

/// [`RowStore`] over in-memory rows.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    writes: Mutex<Vec<WriteRecord>>,
    fetches: Mutex<Vec<(String, u64)>>,
    page_failures: Mutex<HashMap<(String, u64), u32>>,
    failing_keys: Mutex<HashSet<String>>,
}

/// Orders primary keys numerically when both are numbers, else textually.
fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => key_text(a).cmp(&key_text(b)),
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl MemoryRowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rows` to `table`. Each row must carry the table's primary key.
    pub fn insert(&self, table: &str, primary_key: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_string()).or_default();
        stored.extend(rows);
        stored.sort_by(|a, b| {
            compare_keys(
                a.get(primary_key).unwrap_or(&Value::Null),
                b.get(primary_key).unwrap_or(&Value::Null),
            )
        });
    }

    /// Makes the next `times` fetches of `table` at `offset` fail.
    pub fn fail_page(&self, table: &str, offset: u64, times: u32) {
        self.page_failures
            .lock()
            .insert((table.to_string(), offset), times);
    }

    /// Makes every write to the row keyed by `primary_key` fail.
    pub fn fail_write(&self, primary_key: &Value) {
        self.failing_keys.lock().insert(key_text(primary_key));
    }

    /// Current contents of `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Every successful write, in call order.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Offsets fetched from `table`, in call order, including failed ones.
    #[must_use]
    pub fn fetched_offsets(&self, table: &str) -> Vec<u64> {
        self.fetches
            .lock()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn fetch_page(&self, table: &TableSpec, offset: u64, limit: u64) -> anyhow::Result<Vec<Row>> {
        self.fetches.lock().push((table.name.clone(), offset));

        if let Some(remaining) = self
            .page_failures
            .lock()
            .get_mut(&(table.name.clone(), offset))
            .filter(|remaining| **remaining > 0)
        {
            *remaining -= 1;
            anyhow::bail!("injected failure for {} at offset {offset}", table.name);
        }

        let tables = self.tables.read();
        let Some(rows) = tables.get(&table.name) else {
            anyhow::bail!("relation \"{}\" does not exist", table.name);
        };
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);

        Ok(rows
            .iter()
            .skip(skip)
            .take(take)
            .map(|row| {
                std::iter::once(table.primary_key.as_str())
                    .chain(table.field_names())
                    .filter_map(|column| row.get(column).map(|v| (column.to_string(), v.clone())))
                    .collect()
            })
            .collect())
    }

    async fn write_back(
        &self,
        table: &TableSpec,
        primary_key: &Value,
        values: &[(String, Value)],
    ) -> anyhow::Result<u64> {
        if self.failing_keys.lock().contains(&key_text(primary_key)) {
            anyhow::bail!("injected write failure for {primary_key}");
        }

        let mut tables = self.tables.write();
        let Some(row) = tables.get_mut(&table.name).and_then(|rows| {
            rows.iter_mut()
                .find(|row| row.get(&table.primary_key) == Some(primary_key))
        }) else {
            return Ok(0);
        };
        for (column, value) in values {
            row.insert(column.clone(), value.clone());
        }
        drop(tables);

        self.writes.lock().push(WriteRecord {
            table: table.name.clone(),
            primary_key: primary_key.clone(),
            values: values.to_vec(),
        });
        Ok(1)
    }
}
