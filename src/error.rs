//! Error taxonomy
//!
//! [`ConfigError`] and [`RegistryError`] are fatal and abort a run before any
//! dataset work starts. [`LoadError`] and [`SinkError`] are scoped to a single
//! dataset and are turned into a terminal outcome by the dataset loader.

use std::path::PathBuf;

use thiserror::Error;

/// Missing or unusable environment configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("Environment variable {key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The schema registry file could not be loaded
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read schema registry {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema registry {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure while loading one dataset
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Dataset '{0}' is not present in the schema registry")]
    SchemaNotFound(String),

    #[error("No partition files found for {dataset} under {}", dir.display())]
    NoPartitions { dataset: String, dir: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    SinkWrite(#[from] SinkError),

    #[error("Worker panicked: {message}")]
    WorkerPanicked { message: String },
}

impl LoadError {
    /// A task running dataset work panicked or was cancelled
    pub(crate) fn from_join_error(err: tokio::task::JoinError) -> Self {
        let message = if err.is_panic() {
            let payload = err.into_panic();
            if let Some(msg) = payload.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic payload".to_string()
            }
        } else {
            err.to_string()
        };
        LoadError::WorkerPanicked { message }
    }
}

/// Failure while appending a batch to the sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to connect to sink: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Table '{0}' does not exist in the sink")]
    TableNotFound(String),

    #[error("Table '{table}' has no column(s) {}", missing.join(", "))]
    ColumnMismatch { table: String, missing: Vec<String> },

    #[error(
        "Row {row} of batch {batch} for '{table}' has {found} fields, expected {expected}"
    )]
    MalformedRow {
        table: String,
        batch: usize,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Cannot convert {value:?} to {expected} for column '{column}' of '{table}'")]
    InvalidValue {
        table: String,
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("Database error while appending to '{table}': {source}")]
    Database {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}
