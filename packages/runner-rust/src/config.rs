//! Runner configuration.
//!
//! Configuration is read once at startup from a JSON file and then passed by
//! reference into the driver and relocator constructors. Connection and
//! bucket settings resolve in order: file value, environment variable,
//! built-in default.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rehost_core::{SpecError, TableSpec};
use serde::{Deserialize, Deserializer};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: &'static str, value: String },
    #[error("no tables configured")]
    NoTables,
    #[error("invalid batch settings: {0}")]
    InvalidBatch(String),
    #[error(transparent)]
    Table(#[from] SpecError),
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub bucket: BucketConfig,
    pub tables: Vec<TableSpec>,
    pub batch: BatchConfig,
    pub relocation: RelocationConfig,
}

/// Relational store connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Require TLS (`sslmode=require`) when true.
    pub ssl: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// S3-compatible bucket parameters and output URL rewriting rules.
#[derive(Clone, PartialEq, Eq)]
pub struct BucketConfig {
    /// Endpoint host, optionally with scheme (`https://s3.example.com`).
    pub endpoint: String,
    pub key: String,
    pub secret: String,
    /// Bucket name.
    pub name: String,
    /// Signing region.
    pub region: String,
    /// Address objects as `endpoint/bucket/key` instead of `bucket.endpoint/key`.
    pub path_style: bool,
    /// Force the returned reference to `https`.
    pub result_force_https: bool,
    /// Replace the returned reference's origin with this base URL.
    pub result_base_url: Option<String>,
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("result_force_https", &self.result_force_https)
            .field("result_base_url", &self.result_base_url)
            .finish()
    }
}

/// What the driver does when a page query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PagePolicy {
    /// Log the failure and continue with the next page.
    #[default]
    Skip,
    /// Stop processing the table.
    Abort,
    /// Retry the same page, then stop processing the table.
    Retry,
}

/// Paging and pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    /// Rows per page; also the ceiling on concurrently reconciled rows.
    pub page_size: u64,
    pub page_policy: PagePolicy,
    /// Attempts after the first failure under [`PagePolicy::Retry`].
    pub page_retries: u32,
    /// Consecutive failed pages after which [`PagePolicy::Skip`] gives up.
    pub max_consecutive_page_failures: u32,
    /// Relational connection pool size.
    pub max_connections: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            page_policy: PagePolicy::Skip,
            page_retries: 3,
            max_consecutive_page_failures: 3,
            max_connections: 5,
        }
    }
}

/// Asset relocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelocationConfig {
    /// Redirect hops followed before a fetch fails.
    pub max_redirects: u32,
    /// Directory for downloaded files awaiting upload.
    pub temp_dir: PathBuf,
    /// Longest source file name kept in temporary names and object keys.
    pub file_name_max_len: usize,
    /// Per-request timeout for downloads and uploads.
    pub request_timeout_secs: u64,
}

impl RelocationConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            temp_dir: PathBuf::from("temp"),
            file_name_max_len: 40,
            request_timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// File representation
// ---------------------------------------------------------------------------

/// Configuration file contents before environment resolution.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default)]
    pub connection: Option<ConnectionFile>,
    #[serde(default)]
    pub bucket: Option<BucketFile>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub relocation: RelocationConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketFile {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub path_style: Option<bool>,
    pub result_force_https: Option<bool>,
    #[serde(default, deserialize_with = "string_or_false")]
    pub result_base_url: Option<String>,
}

/// Accepts a string, `false`, or `null`; the latter two mean "unset".
fn string_or_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    #[allow(dead_code)]
    enum Raw {
        Text(String),
        Flag(bool),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl AppConfig {
    /// Reads `path` and resolves it against the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable or malformed, an
    /// environment variable is invalid, or a table declaration is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::resolve(file, |var| std::env::var(var).ok())
    }

    /// Resolves file settings against `env`, then validates the result.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::load`].
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |var: &str| non_empty(env(var));

        let conn = file.connection.unwrap_or_default();
        let port = match conn.port {
            Some(port) => port,
            None => match env("DB_PORT") {
                Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "DB_PORT",
                    value: raw,
                })?,
                None => 5432,
            },
        };
        let connection = ConnectionConfig {
            host: non_empty(conn.host)
                .or_else(|| env("DB_HOST"))
                .unwrap_or_else(|| "localhost".into()),
            port,
            user: non_empty(conn.user)
                .or_else(|| env("DB_USER"))
                .unwrap_or_else(|| "postgres".into()),
            password: non_empty(conn.password)
                .or_else(|| env("DB_PASSWORD"))
                .unwrap_or_else(|| "postgres".into()),
            database: non_empty(conn.database)
                .or_else(|| env("DB_NAME"))
                .unwrap_or_else(|| "postgres".into()),
            ssl: conn
                .ssl
                .unwrap_or_else(|| env("DB_SSL").is_some_and(|v| v == "true")),
        };

        let bucket = file.bucket.unwrap_or_default();
        let bucket = BucketConfig {
            endpoint: non_empty(bucket.endpoint)
                .or_else(|| env("BUCKET_ENDPOINT"))
                .unwrap_or_default(),
            key: non_empty(bucket.key)
                .or_else(|| env("BUCKET_KEY"))
                .unwrap_or_default(),
            secret: non_empty(bucket.secret)
                .or_else(|| env("BUCKET_SECRET"))
                .unwrap_or_default(),
            name: non_empty(bucket.name)
                .or_else(|| env("BUCKET_NAME"))
                .unwrap_or_default(),
            region: non_empty(bucket.region)
                .or_else(|| env("BUCKET_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            path_style: bucket.path_style.unwrap_or(false),
            result_force_https: bucket.result_force_https.unwrap_or(false),
            result_base_url: bucket.result_base_url,
        };

        let config = Self {
            connection,
            bucket,
            tables: file.tables,
            batch: file.batch,
            relocation: file.relocation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks table declarations and batch settings.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.is_empty() {
            return Err(ConfigError::NoTables);
        }
        for table in &self.tables {
            table.validate()?;
        }
        if self.batch.page_size == 0 {
            return Err(ConfigError::InvalidBatch("pageSize must be positive".into()));
        }
        if self.batch.max_connections == 0 {
            return Err(ConfigError::InvalidBatch(
                "maxConnections must be positive".into(),
            ));
        }
        Ok(())
    }
}
