//! `rehost` binary: relocate every configured table's external asset
//! references, then report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rehost_runner::{
    init_tracing, AppConfig, AssetRelocator, DryRunRelocator, LogFormat, PagePolicy, PostgresRowStore,
    Relocator, RowReconciler, ShutdownController, TableBatchDriver,
};
use tracing::{error, info, warn};

/// Relocate externally referenced assets into an S3-compatible bucket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, env = "REHOST_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Rows per page (overrides the configuration file)
    #[arg(long)]
    page_size: Option<u64>,

    /// Page query failure handling (overrides the configuration file)
    #[arg(long, value_enum)]
    page_policy: Option<PagePolicy>,

    /// Log output format
    #[arg(long, value_enum, env = "REHOST_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Only process these tables (repeatable)
    #[arg(long = "table")]
    tables: Vec<String>,

    /// Classify and report without uploading or writing back
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_tracing(args.log_format) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "run failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` if any table stopped on a page failure.
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(page_size) = args.page_size {
        config.batch.page_size = page_size;
    }
    if let Some(policy) = args.page_policy {
        config.batch.page_policy = policy;
    }
    config.validate()?;
    info!(
        tables = config.tables.len(),
        page_size = config.batch.page_size,
        policy = ?config.batch.page_policy,
        dry_run = args.dry_run,
        "configuration loaded"
    );

    let store = PostgresRowStore::connect(&config.connection, config.batch.max_connections)
        .await
        .with_context(|| {
            format!(
                "connecting to {}:{}/{}",
                config.connection.host, config.connection.port, config.connection.database
            )
        })?;
    let store = Arc::new(store);

    let relocator: Arc<dyn AssetRelocator> = if args.dry_run {
        Arc::new(DryRunRelocator)
    } else {
        let relocator = Relocator::from_config(&config)?;
        relocator.prepare().await.context("creating temporary directory")?;
        Arc::new(relocator)
    };

    let shutdown = Arc::new(ShutdownController::new());
    shutdown.stop_on_ctrl_c();

    let reconciler = RowReconciler::new(store.clone(), relocator).with_dry_run(args.dry_run);
    let driver = TableBatchDriver::new(reconciler, config.batch.clone(), Arc::clone(&shutdown));
    let report = driver.run_all(&config.tables, &args.tables).await?;

    store.close().await;

    for table in &report.tables {
        match &table.error {
            Some(e) => error!(table = %table.table, error = %e, "table aborted"),
            None if table.interrupted => warn!(table = %table.table, "table interrupted"),
            None => {}
        }
    }
    info!(
        report = %serde_json::to_string(&report)?,
        attempted = report.attempted(),
        updated = report.updated(),
        failed = report.failed(),
        "run complete"
    );
    Ok(!report.any_aborted())
}
