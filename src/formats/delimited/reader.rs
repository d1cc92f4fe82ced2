use anyhow::{Context, Result, bail};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::formats::reader::{DelimitedConfig, Field, RowChunk};
use crate::registry::SchemaRegistry;

/// Derive the dataset name of a partition file from its parent directory
///
/// Paths are split on both `/` and `\`, so `data\orders\part-00000` and
/// `data/orders/part-00000` both name the `orders` dataset.
pub fn dataset_name_from_path(path: &Path) -> Result<String> {
    let text = path.to_string_lossy();
    let segments: Vec<&str> = text.split(['/', '\\']).collect();

    if segments.len() < 2 {
        bail!(
            "Cannot derive dataset name from '{}': expected <dataset>/<file>",
            text
        );
    }

    let file_name = segments[segments.len() - 1];
    let dataset = segments[segments.len() - 2];
    if file_name.is_empty() || dataset.is_empty() || dataset == "." || dataset == ".." {
        bail!(
            "Cannot derive dataset name from '{}': expected <dataset>/<file>",
            text
        );
    }

    Ok(dataset.to_string())
}

/// Lazy reader of fixed-size row chunks from one headerless partition file
///
/// Every call to [`ChunkReader::open`] starts again from the top of the file.
/// The iterator stops after the last row or after the first error.
pub struct ChunkReader {
    path: PathBuf,
    dataset: String,
    columns: Arc<[String]>,
    records: csv::StringRecordsIntoIter<File>,
    chunk_rows: usize,
    next_index: usize,
    finished: bool,
}

impl ChunkReader {
    pub fn open(
        path: impl AsRef<Path>,
        registry: &SchemaRegistry,
        chunk_rows: usize,
        config: DelimitedConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if chunk_rows == 0 {
            bail!("Chunk size must be at least one row");
        }

        let dataset = dataset_name_from_path(&path)?;
        let columns: Arc<[String]> = registry.column_names(&dataset)?.into();

        let file = File::open(&path)
            .with_context(|| format!("Failed to open partition file {}", path.display()))?;

        let records = csv::ReaderBuilder::new()
            .delimiter(config.delimiter)
            .quote(config.quote)
            .has_headers(false)
            .flexible(true)
            .from_reader(file)
            .into_records();

        Ok(Self {
            path,
            dataset,
            columns,
            records,
            chunk_rows,
            next_index: 0,
            finished: false,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    fn read_chunk(&mut self) -> Result<Option<RowChunk>> {
        let mut rows = Vec::with_capacity(self.chunk_rows.min(4096));

        while rows.len() < self.chunk_rows {
            let Some(record) = self.records.next() else {
                break;
            };
            let record = record
                .with_context(|| format!("Failed to parse CSV record in {}", self.path.display()))?;
            rows.push(self.bind_record(&record)?);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let chunk = RowChunk {
            index: self.next_index,
            columns: Arc::clone(&self.columns),
            rows,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Map a record onto the dataset columns; missing trailing fields become NULL
    fn bind_record(&self, record: &csv::StringRecord) -> Result<Vec<Field>> {
        if record.len() > self.columns.len() {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            bail!(
                "Record at line {} of {} has {} fields but dataset '{}' defines {} columns",
                line,
                self.path.display(),
                record.len(),
                self.dataset,
                self.columns.len()
            );
        }

        let mut row: Vec<Field> = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    None
                } else {
                    Some(field.to_string())
                }
            })
            .collect();
        row.resize(self.columns.len(), None);
        Ok(row)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<RowChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
