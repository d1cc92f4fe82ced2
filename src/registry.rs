//! Schema registry: dataset name -> ordered column definitions
//!
//! The registry is read from `schemas.json` at the root of the source directory:
//!
//! ```json
//! {
//!   "orders": [
//!     {"column_name": "order_id", "column_position": 1, "data_type": "integer"},
//!     {"column_name": "order_date", "column_position": 2, "data_type": "timestamp"}
//!   ]
//! }
//! ```
//!
//! Only `column_name` and `column_position` are used; other keys are ignored.
//! Datasets keep the order in which they appear in the document.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::SCHEMAS_FILE_NAME;

/// One column of a dataset as described in the schema file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnSpec {
    pub column_name: String,
    pub column_position: i64,
}

/// Immutable mapping from dataset name to its column definitions
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    datasets: Vec<(String, Vec<ColumnSpec>)>,
}

impl SchemaRegistry {
    /// Path of the schema document under a source base directory
    pub fn path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(SCHEMAS_FILE_NAME)
    }

    /// Read and validate `{base_dir}/schemas.json`
    pub async fn load(base_dir: &Path) -> Result<Self> {
        let path = Self::path_in(base_dir);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;

        Self::from_json(&contents)
            .with_context(|| format!("Failed to parse schema file {}", path.display()))
    }

    /// Parse a schema document
    pub fn from_json(contents: &str) -> Result<Self> {
        // serde_json's `preserve_order` keeps the document's key order
        let document: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(contents).context("Invalid schema JSON")?;

        let mut datasets = Vec::with_capacity(document.len());
        for (dataset, value) in document {
            let columns: Vec<ColumnSpec> = serde_json::from_value(value)
                .with_context(|| format!("Invalid columns for dataset '{}'", dataset))?;

            let mut seen = HashSet::with_capacity(columns.len());
            for column in &columns {
                if !seen.insert(column.column_position) {
                    bail!(
                        "Dataset '{}' has more than one column at position {}",
                        dataset,
                        column.column_position
                    );
                }
            }
            datasets.push((dataset, columns));
        }

        Ok(Self { datasets })
    }

    /// All dataset names in the registry, in document order
    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn get(&self, dataset: &str) -> Option<&[ColumnSpec]> {
        self.datasets
            .iter()
            .find(|(name, _)| name == dataset)
            .map(|(_, columns)| columns.as_slice())
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.get(dataset).is_some()
    }

    /// Column names of a dataset in physical CSV order (ascending position)
    pub fn column_names(&self, dataset: &str) -> Result<Vec<String>> {
        let columns = self
            .get(dataset)
            .ok_or_else(|| anyhow!("Dataset '{}' is not defined in {}", dataset, SCHEMAS_FILE_NAME))?;

        let mut sorted: Vec<&ColumnSpec> = columns.iter().collect();
        sorted.sort_by_key(|c| c.column_position);

        Ok(sorted.into_iter().map(|c| c.column_name.clone()).collect())
    }
}
