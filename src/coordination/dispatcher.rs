use anyhow::Result;
use derive_builder::Builder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::bounded::run_bounded;
use super::dataset_loader::{DatasetLoader, DatasetOutcome, DatasetReport, Job};
use crate::config::{DEFAULT_CHUNK_ROWS, MAX_WORKERS};
use crate::db::ChunkSink;
use crate::formats::DelimitedConfig;
use crate::registry::SchemaRegistry;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Settings for one dispatch run
#[derive(Debug, Clone, Builder)]
pub struct DispatchConfig {
    #[builder(setter(into))]
    pub src_base_dir: PathBuf,
    #[builder(default = "MAX_WORKERS")]
    pub max_workers: usize,
    #[builder(default = "DEFAULT_CHUNK_ROWS")]
    pub chunk_rows: usize,
    #[builder(default)]
    pub delimited: DelimitedConfig,
    #[builder(default)]
    pub quiet: bool,
}

/// Final state of one dataset in a run
#[derive(Debug, Clone)]
pub enum DatasetStatus {
    Loaded(DatasetReport),
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DatasetResult {
    pub dataset: String,
    pub status: DatasetStatus,
}

/// Result of a completed run, one entry per requested dataset in request order
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub workers: usize,
    pub results: Vec<DatasetResult>,
    pub duration: Duration,
    pub chunk_latency_ms: (Option<u64>, Option<u64>, Option<u64>),
}

impl RunSummary {
    pub fn rows_loaded(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match &r.status {
                DatasetStatus::Loaded(report) => report.rows,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> Vec<&DatasetResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, DatasetStatus::Failed(_)))
            .collect()
    }

    pub fn not_found(&self) -> Vec<&DatasetResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, DatasetStatus::NotFound))
            .collect()
    }
}

/// Number of concurrent dataset workers for a run
pub fn worker_count(datasets: usize, max_workers: usize) -> usize {
    datasets.min(max_workers.clamp(1, MAX_WORKERS))
}

/// Resolve the datasets to load: an explicit non-empty list as given, otherwise
/// every dataset named in the schema registry
pub async fn resolve_datasets(
    src_base_dir: &std::path::Path,
    requested: Option<Vec<String>>,
) -> Result<Vec<String>> {
    match requested {
        Some(list) if !list.is_empty() => Ok(list),
        _ => Ok(SchemaRegistry::load(src_base_dir).await?.dataset_names()),
    }
}

/// Fans out one dataset loader per dataset over a bounded set of tasks
pub struct Dispatcher {
    sink: Arc<dyn ChunkSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn ChunkSink>, config: DispatchConfig) -> Self {
        Self { sink, config }
    }

    /// Load the requested datasets (all registry datasets when `None` or empty)
    ///
    /// Fails only when the dataset list cannot be resolved. Per-dataset errors
    /// are reported in the summary and never stop the other datasets.
    pub async fn run(&self, requested: Option<Vec<String>>) -> Result<RunSummary> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Starting load run: {}", run_id);

        let datasets = resolve_datasets(&self.config.src_base_dir, requested).await?;
        let workers = worker_count(datasets.len(), self.config.max_workers);

        if datasets.is_empty() {
            warn!("No datasets to load");
            return Ok(RunSummary {
                run_id,
                workers: 0,
                results: Vec::new(),
                duration: start_time.elapsed(),
                chunk_latency_ms: (None, None, None),
            });
        }

        info!("Loading {} datasets with {} workers", datasets.len(), workers);

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let loader = Arc::new(DatasetLoader::new(
            Arc::clone(&self.sink),
            self.config.chunk_rows,
            self.config.delimited,
            telemetry_tx.clone(),
        ));
        let prog_jh = Self::setup_progress_tracking(datasets.len(), self.config.quiet, telemetry_rx);

        let src_base_dir = self.config.src_base_dir.clone();
        let outcomes = run_bounded(datasets.clone(), workers, |dataset| {
            let loader = Arc::clone(&loader);
            let telemetry_tx = telemetry_tx.clone();
            let job = Job {
                src_base_dir: src_base_dir.clone(),
                dataset: dataset.clone(),
            };

            async move {
                let _ = telemetry_tx.send(TelemetryEvent::DatasetStarted);
                let outcome = loader.load(&job).await;
                let _ = telemetry_tx.send(TelemetryEvent::DatasetFinished);
                outcome
            }
            .instrument(info_span!("dataset", name = %dataset))
        })
        .await;

        // Close the channel so the progress task can finish
        drop(loader);
        drop(telemetry_tx);
        let stats = prog_jh.await.unwrap_or_default();

        let results: Vec<DatasetResult> = datasets
            .into_iter()
            .zip(outcomes)
            .map(|(dataset, outcome)| {
                let status = match outcome {
                    Some(Ok(DatasetOutcome::Loaded(report))) => DatasetStatus::Loaded(report),
                    Some(Ok(DatasetOutcome::NotFound { dataset })) => {
                        warn!("No files found for dataset {}", dataset);
                        DatasetStatus::NotFound
                    }
                    Some(Err(e)) => {
                        error!("Dataset {} failed: {:#}", dataset, e);
                        DatasetStatus::Failed(format!("{:#}", e))
                    }
                    None => DatasetStatus::Failed("worker task panicked".to_string()),
                };
                DatasetResult { dataset, status }
            })
            .collect();

        let summary = RunSummary {
            run_id,
            workers,
            results,
            duration: start_time.elapsed(),
            chunk_latency_ms: stats.get_percentiles(),
        };

        info!(
            "Load complete: {} datasets, {} rows in {} chunks, {} not found, {} failed in {:.2}s",
            summary.results.len(),
            summary.rows_loaded(),
            stats.chunks_loaded,
            summary.not_found().len(),
            summary.failed().len(),
            summary.duration.as_secs_f64()
        );

        Ok(summary)
    }

    /// Setup progress tracking with progress bars
    ///
    /// The returned task drains the telemetry channel until every sender is
    /// dropped, then hands back the aggregated stats.
    fn setup_progress_tracking(
        total_datasets: usize,
        quiet: bool,
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> tokio::task::JoinHandle<ProgressStats> {
        if quiet {
            // Still aggregate latency for the summary
            return tokio::spawn(async move {
                let mut stats = ProgressStats::new();
                while let Some(event) = telemetry_rx.recv().await {
                    stats.update(&event);
                }
                stats
            });
        }

        let multi_progress = MultiProgress::new();

        let dataset_bar = multi_progress.add(ProgressBar::new(total_datasets as u64));
        dataset_bar.set_style(bar_style(
            "[{elapsed_precise}] Datasets:   [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ));

        let rows_bar = multi_progress.add(ProgressBar::new_spinner());
        rows_bar.set_style(bar_style(
            "[{elapsed_precise}] Rows:       {human_pos} | {per_sec}",
        ));

        let stats_bar = multi_progress.add(ProgressBar::new(0));
        stats_bar.set_style(bar_style("[{elapsed_precise}] Chunk Time: {msg}"));

        tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);

                dataset_bar.set_position(stats.datasets_finished as u64);
                dataset_bar.set_message(stats.activity_message());
                rows_bar.set_position(stats.rows_loaded);

                let (p50, p90, p99) = stats.get_percentiles();
                if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                    stats_bar
                        .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                }
            }

            dataset_bar.finish_with_message("All datasets completed");
            rows_bar.finish();

            let (p50, p90, p99) = stats.get_percentiles();
            if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                stats_bar
                    .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
            } else {
                stats_bar.finish();
            }

            stats
        })
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
