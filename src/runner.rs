//! High-level runner API for the dataset resync.
//!
//! This module hides the setup of the registry, the sink connector and the
//! coordinator behind a single entry point. It is the public surface used by
//! the CLI.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::REGISTRY_FILE_NAME;
use crate::coordination::{Coordinator, LoadConfigBuilder};
use crate::db::SinkConnector;
use crate::registry::SchemaRegistry;

pub use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS, Settings, SinkTarget};
pub use crate::coordination::{DatasetOutcome, DatasetReport, JobState, LoadStats, RunReport};
pub use crate::error::{ConfigError, LoadError};

/// Arguments for a resync run
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub settings: Settings,
    /// Defaults to `<source_dir>/schemas.json`
    pub schema_registry: Option<PathBuf>,
    /// Datasets to load; empty means every dataset in the registry
    pub datasets: Vec<String>,
    pub worker_count: usize,
    pub batch_size: usize,
    pub quiet: bool,
}

impl RunArgs {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            schema_registry: None,
            datasets: Vec::new(),
            worker_count: DEFAULT_MAX_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            quiet: false,
        }
    }

    fn registry_path(&self) -> PathBuf {
        self.schema_registry
            .clone()
            .unwrap_or_else(|| self.settings.source_dir.join(REGISTRY_FILE_NAME))
    }
}

/// Resync the requested datasets into the configured sink
///
/// Only setup failures (registry, configuration) are returned as errors.
/// Per-dataset failures are part of the returned report.
pub async fn run(args: RunArgs) -> Result<RunReport> {
    let sink: Arc<dyn SinkConnector> = Arc::new(args.settings.sink.clone());
    run_with_connector(args, sink).await
}

pub(crate) async fn run_with_connector(
    args: RunArgs,
    sink: Arc<dyn SinkConnector>,
) -> Result<RunReport> {
    let registry_path = args.registry_path();
    let registry = SchemaRegistry::load(&registry_path)
        .with_context(|| format!("Failed to load schema registry {}", registry_path.display()))?;
    info!(
        path = %registry_path.display(),
        datasets = registry.len(),
        "loaded schema registry"
    );

    if registry.is_empty() {
        warn!(path = %registry_path.display(), "schema registry lists no datasets");
    }

    let datasets: Vec<String> = if args.datasets.is_empty() {
        registry.dataset_names().map(str::to_string).collect()
    } else {
        args.datasets
    };

    let config = LoadConfigBuilder::default()
        .source_dir(args.settings.source_dir)
        .max_workers(args.worker_count)
        .batch_size(args.batch_size)
        .quiet(args.quiet)
        .build()?;

    let coordinator = Coordinator::new(Arc::new(registry), sink, config);
    Ok(coordinator.run(&datasets).await)
}
