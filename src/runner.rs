//! High-level runner API for the CSV loader.
//!
//! This module provides a simplified public interface that encapsulates the
//! internal setup of connection pools, the appender and the dispatcher.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::coordination::{DispatchConfigBuilder, Dispatcher};
use crate::db::pool::PoolArgsBuilder;
use crate::db::{self as db_pool, DbAppender};
use crate::formats::DelimitedConfig;
use crate::io::discover_partitions;
use crate::registry::SchemaRegistry;

pub use crate::config::{
    ConfigError, ConnectionSettings, DEFAULT_CHUNK_ROWS, MAX_WORKERS, Settings,
};
pub use crate::coordination::{DatasetReport, DatasetResult, DatasetStatus, RunSummary};

/// Arguments for running a load
#[derive(Debug, Clone)]
pub struct LoadArgs {
    pub settings: Settings,

    /// Datasets to load; `None` or an empty list loads every dataset in `schemas.json`
    pub datasets: Option<Vec<String>>,

    // Performance tuning
    pub max_workers: usize,
    pub chunk_rows: usize,

    /// Field delimiter (single character or `\t`); comma when unset
    pub delimiter: Option<String>,
    pub quiet: bool,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<crate::db::Pool>,
}

impl LoadArgs {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            datasets: None,
            max_workers: MAX_WORKERS,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            delimiter: None,
            quiet: false,
            #[cfg(test)]
            test_pool: None,
        }
    }
}

/// What a load would touch, resolved without connecting to the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPlan {
    pub dataset: String,
    /// Column names from `schemas.json`; `None` when the dataset has no entry
    pub columns: Option<Vec<String>>,
    pub files: Vec<PathBuf>,
}

/// Run a load with the specified arguments
///
/// Every requested dataset gets an entry in the returned summary. Only
/// configuration problems (bad delimiter, unreadable `schemas.json` when no
/// explicit list is given, invalid connection settings) fail the call itself.
///
/// # Example
///
/// ```no_run
/// use csv_db_loader::runner::{LoadArgs, Settings, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut args = LoadArgs::new(Settings::from_env()?);
/// args.datasets = Some(vec!["orders".to_string(), "order_items".to_string()]);
///
/// let summary = run_load(args).await?;
/// println!("Loaded {} rows in {:?}", summary.rows_loaded(), summary.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs) -> Result<RunSummary> {
    let delimited = match args.delimiter.as_deref() {
        Some(d) => DelimitedConfig::with_delimiter(d)?,
        None => DelimitedConfig::csv(),
    };
    let max_workers = args.max_workers.clamp(1, MAX_WORKERS);

    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let pool = if let Some(test_pool) = args.test_pool {
        test_pool
    } else {
        connect(&args.settings, max_workers).await?
    };

    #[cfg(not(test))]
    let pool = connect(&args.settings, max_workers).await?;

    let dispatch_config = DispatchConfigBuilder::default()
        .src_base_dir(args.settings.src_base_dir.clone())
        .max_workers(max_workers)
        .chunk_rows(args.chunk_rows)
        .delimited(delimited)
        .quiet(args.quiet)
        .build()?;

    let dispatcher = Dispatcher::new(Arc::new(DbAppender::new(pool)), dispatch_config);
    dispatcher.run(args.datasets).await
}

async fn connect(settings: &Settings, max_workers: usize) -> Result<db_pool::Pool> {
    info!("Connecting to {}", settings.connection.redacted_uri());

    let pool_args = PoolArgsBuilder::default()
        .connection_uri(settings.connection.connection_uri()?)
        .max_size(max_workers as u32)
        .build()?;
    db_pool::pool::pool(pool_args).await
}

/// Resolve datasets, columns and partition files without touching the database
pub async fn plan_load(src_base_dir: &Path, datasets: Option<Vec<String>>) -> Result<Vec<DatasetPlan>> {
    let registry = SchemaRegistry::load(src_base_dir)
        .await
        .context("Cannot plan load")?;
    let datasets = match datasets {
        Some(list) if !list.is_empty() => list,
        _ => registry.dataset_names(),
    };

    let mut plans = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let files = discover_partitions(src_base_dir, &dataset).await?;
        let columns = registry.column_names(&dataset).ok();
        plans.push(DatasetPlan {
            dataset,
            columns,
            files,
        });
    }

    Ok(plans)
}
