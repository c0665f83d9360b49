//! Schema registry: dataset name to ordered column names

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{LoadError, RegistryError};

/// One column descriptor as stored in `schemas.json`
///
/// Descriptors may carry more fields (e.g. `data_type`); they are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDescriptor {
    pub column_name: String,
    pub column_position: i64,
}

/// Read-only mapping from dataset name to its column descriptors
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    datasets: BTreeMap<String, Vec<ColumnDescriptor>>,
}

impl SchemaRegistry {
    /// Load the registry from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&contents).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let datasets = serde_json::from_str(contents)?;
        Ok(Self { datasets })
    }

    /// Column names of a dataset, ordered by position
    ///
    /// The sort is stable: descriptors sharing a position keep the order in
    /// which they appear in the registry file.
    pub fn resolve_columns(&self, dataset: &str) -> Result<Vec<String>, LoadError> {
        let descriptors = self
            .datasets
            .get(dataset)
            .ok_or_else(|| LoadError::SchemaNotFound(dataset.to_string()))?;

        let mut ordered: Vec<&ColumnDescriptor> = descriptors.iter().collect();
        ordered.sort_by_key(|col| col.column_position);

        Ok(ordered.into_iter().map(|col| col.column_name.clone()).collect())
    }

    /// Every dataset known to the registry, in lexicographic order
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REGISTRY: &str = r#"{
        "orders": [
            {"column_name": "order_status", "data_type": "string", "column_position": 4},
            {"column_name": "order_id", "data_type": "integer", "column_position": 1},
            {"column_name": "order_customer_id", "data_type": "integer", "column_position": 3},
            {"column_name": "order_date", "data_type": "timestamp", "column_position": 2}
        ],
        "departments": [
            {"column_name": "department_id", "column_position": 1},
            {"column_name": "department_name", "column_position": 2}
        ]
    }"#;

    #[test]
    fn test_columns_sorted_by_position() {
        let registry = SchemaRegistry::from_json(REGISTRY).unwrap();
        let columns = registry.resolve_columns("orders").unwrap();

        assert_eq!(
            columns,
            vec!["order_id", "order_date", "order_customer_id", "order_status"]
        );
    }

    #[test]
    fn test_unknown_dataset() {
        let registry = SchemaRegistry::from_json(REGISTRY).unwrap();

        match registry.resolve_columns("customers") {
            Err(LoadError::SchemaNotFound(name)) => assert_eq!(name, "customers"),
            other => panic!("expected SchemaNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_position_ties_keep_file_order() {
        let registry = SchemaRegistry::from_json(
            r#"{"t": [
                {"column_name": "b", "column_position": 1},
                {"column_name": "a", "column_position": 1},
                {"column_name": "z", "column_position": 0}
            ]}"#,
        )
        .unwrap();

        assert_eq!(registry.resolve_columns("t").unwrap(), vec!["z", "b", "a"]);
    }

    #[test]
    fn test_dataset_names_sorted() {
        let registry = SchemaRegistry::from_json(REGISTRY).unwrap();
        let names: Vec<&str> = registry.dataset_names().collect();

        assert_eq!(names, vec!["departments", "orders"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.dataset_names().any(|name| name == "orders"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(REGISTRY.as_bytes()).unwrap();
        file.flush().unwrap();

        let registry = SchemaRegistry::load(file.path()).unwrap();
        assert_eq!(registry.resolve_columns("departments").unwrap().len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SchemaRegistry::load(dir.path().join("schemas.json")).unwrap_err();

        assert!(matches!(err, RegistryError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"orders": [{{"column_name": "id"}}]}}"#).unwrap();
        file.flush().unwrap();

        let err = SchemaRegistry::load(file.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Malformed { .. }));
    }
}
