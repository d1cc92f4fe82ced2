use anyhow::Context;
use clap::Parser;
use csv_db_loader::runner::{
    DEFAULT_CHUNK_ROWS, DatasetStatus, LoadArgs, MAX_WORKERS, RunSummary, Settings, plan_load,
    run_load,
};

/// Bulk-load partitioned, headerless CSV datasets into PostgreSQL.
///
/// Connection and source settings come from the environment (SRC_BASE_DIR,
/// DB_HOST, DB_PORT, DB_USERNAME, DB_PASSWORD, DB_NAME); a `.env` file in the
/// working directory is read first.
#[derive(Parser, Clone)]
#[command(version)]
struct Args {
    /// JSON array of dataset names, e.g. '["orders","customers"]' (default: every dataset in schemas.json)
    datasets: Option<String>,

    /// Maximum number of datasets loaded concurrently (at most 8)
    #[arg(short, long, default_value_t = MAX_WORKERS as u64, value_parser = clap::value_parser!(u64).range(1..=MAX_WORKERS as u64))]
    workers: u64,

    /// Rows read and inserted per chunk
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_ROWS as u64, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Field delimiter (single character, or \t for tab)
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Show datasets, columns and partition files without loading data
    #[arg(long)]
    dry_run: bool,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the variables may already be exported
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing based on quiet mode; RUST_LOG takes precedence
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default_filter = if args.quiet {
        "csv_db_loader=warn,sqlx=off"
    } else {
        "csv_db_loader=info,sqlx=off"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let datasets = args
        .datasets
        .as_deref()
        .map(cli::parse_dataset_list)
        .transpose()
        .context("Invalid dataset list")?;

    let settings = Settings::from_env()?;

    if !args.quiet {
        println!("CSV Data Loader");
        println!("===============");
        println!("Source: {}", settings.src_base_dir.display());
        println!("Database: {}", settings.connection.redacted_uri());
        println!("Workers: {}", args.workers);
        println!();
    }

    if args.dry_run {
        return dry_run(&settings, datasets).await;
    }

    let mut load_args = LoadArgs::new(settings);
    load_args.datasets = datasets;
    load_args.max_workers = args.workers as usize;
    load_args.chunk_rows = args.chunk_size as usize;
    load_args.delimiter = args.delimiter;
    load_args.quiet = args.quiet;

    let summary = run_load(load_args).await?;
    print_summary(&summary);

    let failed = summary.failed();
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|r| r.dataset.as_str()).collect();
        anyhow::bail!("{} dataset(s) failed: {}", failed.len(), names.join(", "));
    }

    Ok(())
}

async fn dry_run(settings: &Settings, datasets: Option<Vec<String>>) -> anyhow::Result<()> {
    let plans = plan_load(&settings.src_base_dir, datasets).await?;

    println!("DRY RUN MODE - No data will be loaded");
    println!();
    for plan in &plans {
        println!("{}", plan.dataset);
        match &plan.columns {
            Some(columns) => println!("  Columns: {}", columns.join(", ")),
            None => println!("  Columns: <not in schemas.json>"),
        }
        if plan.files.is_empty() {
            println!("  Files: none");
        } else {
            println!("  Files: {}", plan.files.len());
            for file in &plan.files {
                println!("    {}", file.display());
            }
        }
    }
    println!();
    println!("To execute, run without --dry-run");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", summary.run_id);
    println!("Workers: {}", summary.workers);
    for result in &summary.results {
        match &result.status {
            DatasetStatus::Loaded(report) => println!(
                "  {:<24} loaded    {} rows, {} files, {} chunks in {:.2}s",
                result.dataset,
                report.rows,
                report.files,
                report.chunks,
                report.duration.as_secs_f64()
            ),
            DatasetStatus::NotFound => println!("  {:<24} no files", result.dataset),
            DatasetStatus::Failed(message) => {
                println!("  {:<24} FAILED    {}", result.dataset, message)
            }
        }
    }
    println!("Rows loaded: {}", summary.rows_loaded());
    println!("Duration: {:.2}s", summary.duration.as_secs_f64());
    if let (Some(p50), Some(p90), Some(p99)) = summary.chunk_latency_ms {
        println!("Chunk latency: p50 {}ms, p90 {}ms, p99 {}ms", p50, p90, p99);
    }
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    /// Parse the positional dataset list: a JSON array of dataset names
    pub fn parse_dataset_list(raw: &str) -> anyhow::Result<Vec<String>> {
        let datasets: Vec<String> = serde_json::from_str(raw).map_err(|e| {
            anyhow::anyhow!(
                "Expected a JSON array of dataset names (e.g. '[\"orders\",\"customers\"]'): {}",
                e
            )
        })?;

        if let Some(blank) = datasets.iter().find(|d| d.trim().is_empty()) {
            anyhow::bail!("Dataset names cannot be empty (got {:?})", blank);
        }

        Ok(datasets)
    }

}
