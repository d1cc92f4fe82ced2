use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::PARTITION_PREFIX;

/// Directory holding the partition files of a dataset
pub fn dataset_dir(src_base_dir: &Path, dataset: &str) -> PathBuf {
    src_base_dir.join(dataset)
}

/// List the partition files (`{src_base_dir}/{dataset}/part-*`) of a dataset
///
/// A missing dataset directory yields an empty list, the same as a directory
/// without partitions. Subdirectories matching the prefix are skipped. The
/// result is sorted by file name so repeated runs read files in the same order.
pub async fn discover_partitions(src_base_dir: &Path, dataset: &str) -> Result<Vec<PathBuf>> {
    let dir = dataset_dir(src_base_dir, dataset);

    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to list dataset directory {}", dir.display()));
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to read dataset directory {}", dir.display()))?
    {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(PARTITION_PREFIX) {
            continue;
        }

        // Follows symlinks, so a linked partition file still counts
        let metadata = fs::metadata(entry.path())
            .await
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if metadata.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_discovers_only_prefixed_files_in_order() {
        let base = TempDir::new().unwrap();
        let ds = base.path().join("orders");
        std::fs::create_dir(&ds).unwrap();
        std::fs::write(ds.join("part-00001"), "2,b\n").unwrap();
        std::fs::write(ds.join("part-00000"), "1,a\n").unwrap();
        std::fs::write(ds.join("_SUCCESS"), "").unwrap();
        std::fs::write(ds.join("orders.csv"), "x\n").unwrap();
        std::fs::create_dir(ds.join("part-dir")).unwrap();

        let files = discover_partitions(base.path(), "orders").await.unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["part-00000", "part-00001"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let base = TempDir::new().unwrap();
        let files = discover_partitions(base.path(), "nope").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_empty_directory_is_empty() {
        let base = TempDir::new().unwrap();
        std::fs::create_dir(base.path().join("customers")).unwrap();

        let files = discover_partitions(base.path(), "customers").await.unwrap();
        assert!(files.is_empty());
    }
}
