use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::db::ChunkSink;
use crate::formats::{ChunkReader, DelimitedConfig, RowChunk};
use crate::io::discover_partitions;
use crate::registry::SchemaRegistry;
use crate::telemetry::TelemetryEvent;

/// One unit of work: load every partition of `dataset` found under `src_base_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub src_base_dir: PathBuf,
    pub dataset: String,
}

/// What happened to a dataset that did not fail
#[derive(Debug, Clone)]
pub enum DatasetOutcome {
    Loaded(DatasetReport),
    /// No partition files exist; nothing was written
    NotFound { dataset: String },
}

#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset: String,
    pub files: usize,
    pub chunks: usize,
    pub rows: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Loads all partition files of one dataset into its destination table
///
/// Files are processed in name order and chunks in file order, strictly one
/// after another. Chunks appended before a failure stay committed.
pub struct DatasetLoader {
    sink: Arc<dyn ChunkSink>,
    chunk_rows: usize,
    delimited: DelimitedConfig,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl DatasetLoader {
    pub fn new(
        sink: Arc<dyn ChunkSink>,
        chunk_rows: usize,
        delimited: DelimitedConfig,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            sink,
            chunk_rows,
            delimited,
            telemetry_tx,
        }
    }

    pub async fn load(&self, job: &Job) -> Result<DatasetOutcome> {
        info!("Processing {}", job.dataset);
        let started_at = Utc::now();
        let start = Instant::now();

        let registry = Arc::new(SchemaRegistry::load(&job.src_base_dir).await?);

        let files = discover_partitions(&job.src_base_dir, &job.dataset).await?;
        if files.is_empty() {
            return Ok(DatasetOutcome::NotFound {
                dataset: job.dataset.clone(),
            });
        }
        debug!("Found {} partition files for {}", files.len(), job.dataset);

        if !registry.contains(&job.dataset) {
            anyhow::bail!(
                "Dataset '{}' has {} partition files but no entry in schemas.json",
                job.dataset,
                files.len()
            );
        }
        let columns = registry.column_names(&job.dataset)?;
        let plan = self.sink.prepare(&job.dataset, &columns).await?;

        let mut chunks = 0;
        let mut rows = 0;
        for file in &files {
            let reader = self.open_reader(file, &registry).await?;
            debug!(
                "Reading {} as {} ({} columns)",
                file.display(),
                reader.dataset(),
                reader.columns().len()
            );
            let mut reader = Some(reader);

            while let Some(chunk) = next_chunk(&mut reader).await? {
                info!("Populating chunk {} of {}", chunk.index, job.dataset);

                let chunk_start = Instant::now();
                let written = self.sink.append(&plan, &chunk).await.with_context(|| {
                    format!(
                        "Failed to load chunk {} of {} from {}",
                        chunk.index,
                        job.dataset,
                        file.display()
                    )
                })?;

                let _ = self.telemetry_tx.send(TelemetryEvent::ChunkLoaded {
                    rows: written,
                    duration_ms: chunk_start.elapsed().as_millis() as u64,
                });

                chunks += 1;
                rows += written;
            }
        }

        let report = DatasetReport {
            dataset: job.dataset.clone(),
            files: files.len(),
            chunks,
            rows,
            started_at,
            completed_at: Utc::now(),
            duration: start.elapsed(),
        };

        info!(
            "Loaded {} rows into {} from {} files in {:.2}s",
            report.rows,
            report.dataset,
            report.files,
            report.duration.as_secs_f64()
        );

        Ok(DatasetOutcome::Loaded(report))
    }

    async fn open_reader(&self, file: &Path, registry: &Arc<SchemaRegistry>) -> Result<ChunkReader> {
        let file = file.to_path_buf();
        let registry = Arc::clone(registry);
        let chunk_rows = self.chunk_rows;
        let delimited = self.delimited;

        tokio::task::spawn_blocking(move || ChunkReader::open(file, &registry, chunk_rows, delimited))
            .await
            .context("Partition reader task failed")?
    }
}

/// Pull the next chunk off the blocking reader without stalling the runtime
async fn next_chunk(reader: &mut Option<ChunkReader>) -> Result<Option<RowChunk>> {
    let Some(mut current) = reader.take() else {
        return Ok(None);
    };

    let (current, next) = tokio::task::spawn_blocking(move || {
        let next = current.next();
        (current, next)
    })
    .await
    .context("Partition reader task failed")?;

    *reader = Some(current);
    next.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::appender::{InsertPlan, TargetColumn};
    use crate::db::schema::SqlType;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Sink that records every call instead of writing anywhere
    #[derive(Default)]
    struct RecordingSink {
        prepared: Mutex<Vec<(String, Vec<String>)>>,
        appended: Mutex<Vec<(usize, usize, Option<String>)>>,
        fail_on_append: Option<usize>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn prepare(&self, table: &str, columns: &[String]) -> Result<InsertPlan> {
            self.prepared
                .lock()
                .unwrap()
                .push((table.to_string(), columns.to_vec()));
            Ok(InsertPlan {
                table: table.to_string(),
                columns: columns
                    .iter()
                    .map(|c| TargetColumn::new(c.clone(), SqlType::Text))
                    .collect(),
            })
        }

        async fn append(&self, _plan: &InsertPlan, chunk: &RowChunk) -> Result<u64> {
            let mut appended = self.appended.lock().unwrap();
            if self.fail_on_append == Some(appended.len()) {
                anyhow::bail!("connection reset");
            }
            let first = chunk.rows.first().and_then(|r| r[0].clone());
            appended.push((chunk.index, chunk.len(), first));
            Ok(chunk.len() as u64)
        }
    }

    fn write_fixture(dir: &Path, dataset_files: &[(&str, &str, usize)]) {
        std::fs::write(
            dir.join("schemas.json"),
            r#"{
                "orders": [
                    {"column_name": "order_status", "column_position": 4},
                    {"column_name": "order_id", "column_position": 1},
                    {"column_name": "order_date", "column_position": 2},
                    {"column_name": "order_customer_id", "column_position": 3}
                ],
                "departments": [
                    {"column_name": "department_id", "column_position": 1},
                    {"column_name": "department_name", "column_position": 2}
                ]
            }"#,
        )
        .unwrap();

        for (dataset, file, rows) in dataset_files {
            let ds_dir = dir.join(dataset);
            std::fs::create_dir_all(&ds_dir).unwrap();
            let body: String = (0..*rows)
                .map(|i| format!("{}-{},2013-07-25 00:00:00.0,{},CLOSED\n", file, i, i))
                .collect();
            std::fs::write(ds_dir.join(file), body).unwrap();
        }
    }

    fn loader(sink: Arc<RecordingSink>, chunk_rows: usize) -> (DatasetLoader, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            DatasetLoader::new(sink, chunk_rows, DelimitedConfig::csv(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_loads_files_in_name_order_chunk_by_chunk() {
        let dir = TempDir::new().unwrap();
        write_fixture(
            dir.path(),
            &[("orders", "part-00001", 3), ("orders", "part-00000", 5)],
        );

        let sink = Arc::new(RecordingSink::default());
        let (loader, mut rx) = loader(Arc::clone(&sink), 2);

        let outcome = loader
            .load(&Job {
                src_base_dir: dir.path().to_path_buf(),
                dataset: "orders".to_string(),
            })
            .await
            .unwrap();

        let DatasetOutcome::Loaded(report) = outcome else {
            panic!("expected Loaded");
        };
        assert_eq!(report.files, 2);
        assert_eq!(report.chunks, 5);
        assert_eq!(report.rows, 8);
        assert!(report.completed_at >= report.started_at);

        assert_eq!(
            *sink.prepared.lock().unwrap(),
            vec![(
                "orders".to_string(),
                vec![
                    "order_id".to_string(),
                    "order_date".to_string(),
                    "order_customer_id".to_string(),
                    "order_status".to_string()
                ]
            )]
        );

        let appended = sink.appended.lock().unwrap().clone();
        assert_eq!(
            appended,
            vec![
                (0, 2, Some("part-00000-0".to_string())),
                (1, 2, Some("part-00000-2".to_string())),
                (2, 1, Some("part-00000-4".to_string())),
                (0, 2, Some("part-00001-0".to_string())),
                (1, 1, Some("part-00001-2".to_string())),
            ]
        );

        let mut loaded_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TelemetryEvent::ChunkLoaded { .. }) {
                loaded_events += 1;
            }
        }
        assert_eq!(loaded_events, 5);
    }

    #[tokio::test]
    async fn test_missing_files_is_not_found_without_writes() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path(), &[("orders", "part-00000", 1)]);
        std::fs::create_dir_all(dir.path().join("departments")).unwrap();
        std::fs::write(dir.path().join("departments").join("README"), "x").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let (loader, _rx) = loader(Arc::clone(&sink), 10);

        for dataset in ["departments", "customers"] {
            let outcome = loader
                .load(&Job {
                    src_base_dir: dir.path().to_path_buf(),
                    dataset: dataset.to_string(),
                })
                .await
                .unwrap();
            assert!(
                matches!(outcome, DatasetOutcome::NotFound { dataset: ref d } if d == dataset)
            );
        }

        assert!(sink.prepared.lock().unwrap().is_empty());
        assert!(sink.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_schema_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (loader, _rx) = loader(sink, 10);

        let result = loader
            .load(&Job {
                src_base_dir: dir.path().to_path_buf(),
                dataset: "orders".to_string(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_files_without_schema_entry_fail() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path(), &[("customers", "part-00000", 2)]);

        let sink = Arc::new(RecordingSink::default());
        let (loader, _rx) = loader(Arc::clone(&sink), 10);

        let result = loader
            .load(&Job {
                src_base_dir: dir.path().to_path_buf(),
                dataset: "customers".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert!(sink.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_failure_keeps_earlier_chunks() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path(), &[("orders", "part-00000", 6)]);

        let sink = Arc::new(RecordingSink {
            fail_on_append: Some(1),
            ..Default::default()
        });
        let (loader, _rx) = loader(Arc::clone(&sink), 2);

        let err = loader
            .load(&Job {
                src_base_dir: dir.path().to_path_buf(),
                dataset: "orders".to_string(),
            })
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("chunk 1 of orders"));
        assert_eq!(sink.appended.lock().unwrap().len(), 1);
    }
}
