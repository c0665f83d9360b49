use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::PARTITION_PREFIX;
use crate::error::LoadError;

/// List the partition files of a dataset, sorted by file name
///
/// Partitions are the regular files directly under `<source_dir>/<dataset>/`
/// whose names start with [`PARTITION_PREFIX`]. A missing dataset directory
/// simply has no partitions.
pub async fn discover_partitions(source_dir: &Path, dataset: &str) -> Result<Vec<PathBuf>, LoadError> {
    let dir = source_dir.join(dataset);
    let read_error = |source: std::io::Error| LoadError::FileRead {
        path: dir.clone(),
        source: source.into(),
    };

    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_error(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let is_partition = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(PARTITION_PREFIX));
        if !is_partition {
            continue;
        }

        // Follows symlinks, so linked partition files are picked up too
        let metadata = fs::metadata(entry.path()).await.map_err(read_error)?;
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
    async fn test_only_partition_files_in_name_order() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("orders");
        std::fs::create_dir_all(dir.join("part-nested")).unwrap();
        for name in ["part-00002", "part-00000", "_SUCCESS", "other.csv", "part-00001"] {
            std::fs::write(dir.join(name), "1,2\n").unwrap();
        }

        let files = discover_partitions(root.path(), "orders").await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["part-00000", "part-00001", "part-00002"]);
    }

    #[tokio::test]
    async fn test_missing_directory_has_no_partitions() {
        let root = TempDir::new().unwrap();
        let files = discover_partitions(root.path(), "customers").await.unwrap();

        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_directory_without_partitions() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("customers")).unwrap();
        std::fs::write(root.path().join("customers").join("readme.txt"), "x").unwrap();

        let files = discover_partitions(root.path(), "customers").await.unwrap();
        assert!(files.is_empty());
    }
}
