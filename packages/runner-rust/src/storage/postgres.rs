//! PostgreSQL [`RowStore`].
//!
//! Rows cross the boundary as JSON in both directions: pages are read with
//! `to_jsonb` over a projected subquery, and write-back binds one JSON object
//! that `jsonb_populate_record` casts to the table's row type. The server
//! therefore converts every value to and from its column type, whatever the
//! declared field shapes are.

use async_trait::async_trait;
use rehost_core::{Row, TableSpec};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::traits::RowStore;

/// Quotes one identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a possibly schema-qualified name (`public.posts`).
fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Paged read: primary key plus declared fields, ordered by primary key.
///
/// Binds `$1` = limit, `$2` = offset.
#[must_use]
pub fn select_page_sql(table: &TableSpec) -> String {
    let pk = quote_ident(&table.primary_key);
    let columns: Vec<String> = std::iter::once(pk.clone())
        .chain(table.field_names().map(quote_ident))
        .collect();
    let filter = table
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| format!(" WHERE {f}"))
        .unwrap_or_default();
    format!(
        "SELECT to_jsonb(t) FROM (SELECT {} FROM {}{filter} ORDER BY {pk} LIMIT $1 OFFSET $2) t ORDER BY t.{pk}",
        columns.join(", "),
        quote_qualified(&table.name),
    )
}

/// Write-back of every declared field, keyed by primary key.
///
/// Binds `$1` = a JSON object holding the primary key and the new values.
#[must_use]
pub fn update_sql(table: &TableSpec) -> String {
    let pk = quote_ident(&table.primary_key);
    let name = quote_qualified(&table.name);
    let assignments: Vec<String> = table
        .field_names()
        .map(|f| {
            let col = quote_ident(f);
            format!("{col} = src.{col}")
        })
        .collect();
    format!(
        "UPDATE {name} AS target SET {} FROM jsonb_populate_record(NULL::{name}, $1) AS src WHERE target.{pk} = src.{pk}",
        assignments.join(", "),
    )
}

/// [`RowStore`] over a `PostgreSQL` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    /// Opens a pool and verifies that a connection can be made.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or rejects the
    /// credentials.
    pub async fn connect(config: &ConnectionConfig, max_connections: u32) -> anyhow::Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(if config.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Disable
            });
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn fetch_page(&self, table: &TableSpec, offset: u64, limit: u64) -> anyhow::Result<Vec<Row>> {
        let sql = select_page_sql(table);
        debug!(table = %table.name, offset, limit, "fetching page");
        let rows: Vec<Json<Value>> = sqlx::query_scalar(&sql)
            .bind(i64::try_from(limit)?)
            .bind(i64::try_from(offset)?)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|Json(value)| match value {
                Value::Object(row) => Ok(row),
                other => Err(anyhow::anyhow!("expected a row object, got {other}")),
            })
            .collect()
    }

    async fn write_back(
        &self,
        table: &TableSpec,
        primary_key: &Value,
        values: &[(String, Value)],
    ) -> anyhow::Result<u64> {
        let mut record = Row::new();
        record.insert(table.primary_key.clone(), primary_key.clone());
        for (column, value) in values {
            record.insert(column.clone(), value.clone());
        }

        let result = sqlx::query(&update_sql(table))
            .bind(Json(Value::Object(record)))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
