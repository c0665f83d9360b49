use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::job::{DatasetJob, DatasetOutcome, DatasetReport, JobState, LoadStats};
use crate::db::BatchSink;
use crate::error::LoadError;
use crate::formats::{DelimitedConfig, open_batches_blocking};
use crate::io::discover_partitions;
use crate::registry::SchemaRegistry;
use crate::telemetry::TelemetryEvent;

/// Loads one dataset end to end
///
/// Files are processed one at a time in discovery order and batches in read
/// order, so rows of a dataset are appended deterministically. Nothing is
/// retried and nothing already appended is rolled back.
pub struct DatasetLoader {
    registry: Arc<SchemaRegistry>,
    delimited: DelimitedConfig,
    batch_size: usize,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl DatasetLoader {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        batch_size: usize,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            registry,
            delimited: DelimitedConfig::csv(),
            batch_size,
            telemetry_tx,
        }
    }

    /// Run a job to a terminal state
    ///
    /// Dataset-scoped errors never escape; they become the report's outcome.
    pub async fn load_dataset(&self, job: DatasetJob) -> DatasetReport {
        let start = Instant::now();
        let dataset = job.dataset.as_str();
        info!(dataset, state = %JobState::Running, "processing dataset");
        let _ = self.telemetry_tx.send(TelemetryEvent::DatasetStarted);

        let mut stats = LoadStats::default();
        let outcome = match self.run_job(&job, &mut stats).await {
            Ok(()) => {
                info!(
                    dataset,
                    files = stats.files,
                    batches = stats.batches,
                    rows = stats.rows,
                    "dataset loaded"
                );
                DatasetOutcome::Succeeded(stats)
            }
            Err(err @ LoadError::NoPartitions { .. }) => {
                warn!(dataset, error = %err, "skipping dataset");
                DatasetOutcome::Skipped(err)
            }
            Err(
                err @ (LoadError::SchemaNotFound(_)
                | LoadError::FileRead { .. }
                | LoadError::SinkWrite(_)
                | LoadError::WorkerPanicked { .. }),
            ) => {
                error!(
                    dataset,
                    error = %err,
                    rows_appended = stats.rows,
                    "dataset failed"
                );
                DatasetOutcome::Failed {
                    error: err,
                    partial: stats,
                }
            }
        };

        let _ = self.telemetry_tx.send(TelemetryEvent::DatasetFinished {
            state: outcome.state(),
        });

        DatasetReport {
            dataset: job.dataset.clone(),
            outcome,
            duration: start.elapsed(),
        }
    }

    async fn run_job(&self, job: &DatasetJob, stats: &mut LoadStats) -> Result<(), LoadError> {
        let columns: Arc<[String]> = self.registry.resolve_columns(&job.dataset)?.into();

        let files = discover_partitions(&job.source_dir, &job.dataset).await?;
        if files.is_empty() {
            return Err(LoadError::NoPartitions {
                dataset: job.dataset.clone(),
                dir: job.source_dir.join(&job.dataset),
            });
        }
        info!(dataset = %job.dataset, partitions = files.len(), "discovered partitions");

        let mut sink = job.sink.connect().await?;
        for file in &files {
            self.load_file(&job.dataset, file, Arc::clone(&columns), sink.as_mut(), stats)
                .await?;
            stats.files += 1;
        }

        Ok(())
    }

    async fn load_file(
        &self,
        dataset: &str,
        file: &Path,
        columns: Arc<[String]>,
        sink: &mut dyn BatchSink,
        stats: &mut LoadStats,
    ) -> Result<(), LoadError> {
        let mut batches = open_batches_blocking(
            file.to_path_buf(),
            columns,
            self.delimited.clone(),
            self.batch_size,
        )
        .await?;
        debug!(dataset, file = %batches.path().display(), "opened partition");

        loop {
            let (reader, next) = batches.next_blocking().await?;
            batches = reader;
            let Some(batch) = next else {
                break;
            };
            let batch = batch?;
            info!(
                dataset,
                file = %file.display(),
                batch = batch.index(),
                rows = batch.len(),
                "populating chunk"
            );

            let start = Instant::now();
            sink.append_batch(&batch, dataset).await?;

            stats.batches += 1;
            stats.rows += batch.len() as u64;
            let _ = self.telemetry_tx.send(TelemetryEvent::BatchLoaded {
                rows: batch.len() as u64,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        Ok(())
    }
}
