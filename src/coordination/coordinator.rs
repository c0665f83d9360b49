use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use derive_builder::Builder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::job::{DatasetJob, DatasetOutcome, DatasetReport, JobState, LoadStats, RunReport};
use super::worker::DatasetLoader;
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS};
use crate::db::SinkConnector;
use crate::error::LoadError;
use crate::registry::SchemaRegistry;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Configuration for a run
#[derive(Debug, Clone, Builder)]
pub struct LoadConfig {
    pub source_dir: PathBuf,
    #[builder(default = "DEFAULT_MAX_WORKERS")]
    pub max_workers: usize,
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    #[builder(default)]
    pub quiet: bool,
}

/// Number of concurrent workers for `datasets` jobs
pub fn worker_pool_size(datasets: usize, max_workers: usize) -> usize {
    datasets.min(max_workers.max(1))
}

/// The Coordinator fans dataset jobs out over a bounded worker pool.
pub struct Coordinator {
    registry: Arc<SchemaRegistry>,
    sink: Arc<dyn SinkConnector>,
    config: LoadConfig,
}

impl Coordinator {
    pub fn new(registry: Arc<SchemaRegistry>, sink: Arc<dyn SinkConnector>, config: LoadConfig) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    /// Load every dataset and wait until all of them reach a terminal state
    ///
    /// A skipped or failed dataset never stops the others; the run itself
    /// cannot fail once it starts. Duplicate names are loaded once.
    pub async fn run(&self, datasets: &[String]) -> RunReport {
        let start_time = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let jobs = self.build_jobs(datasets);
        let pool_size = worker_pool_size(jobs.len(), self.config.max_workers);
        info!(
            run_id = %run_id,
            datasets = jobs.len(),
            workers = pool_size,
            batch_size = self.config.batch_size,
            "starting run"
        );

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let prog_jh = self.setup_progress_tracking(jobs.len(), telemetry_rx);

        let order: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(idx, job)| (job.dataset.clone(), idx))
            .collect();
        let mut reports = self.execute(jobs, pool_size, telemetry_tx).await;
        reports.sort_by_key(|r| order.get(&r.dataset).copied().unwrap_or(usize::MAX));

        // Wait for the progress bar to finish so we don't collide output
        if let Some(jh) = prog_jh {
            let _ = jh.await;
        }

        let report = RunReport {
            run_id,
            started_at,
            reports,
            duration: start_time.elapsed(),
        };
        info!(
            run_id = %report.run_id,
            succeeded = report.count(JobState::Succeeded),
            skipped = report.count(JobState::Skipped),
            failed = report.count(JobState::Failed),
            rows = report.rows_appended(),
            "run complete in {:.2}s",
            report.duration.as_secs_f64()
        );
        report
    }

    fn build_jobs(&self, datasets: &[String]) -> Vec<DatasetJob> {
        let mut seen = HashSet::new();
        datasets
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                debug!(dataset = %name, state = %JobState::Pending, "queued dataset");
                DatasetJob {
                    dataset: name.clone(),
                    source_dir: self.config.source_dir.clone(),
                    sink: Arc::clone(&self.sink),
                }
            })
            .collect()
    }

    /// Run jobs with at most `pool_size` in flight
    async fn execute(
        &self,
        jobs: Vec<DatasetJob>,
        pool_size: usize,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Vec<DatasetReport> {
        let mut join_set: JoinSet<DatasetReport> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut reports = Vec::with_capacity(jobs.len());

        for job in jobs {
            // Wait for a free worker
            while join_set.len() >= pool_size {
                if let Some(result) = join_set.join_next_with_id().await {
                    reports.push(Self::settle(result, &mut running, &telemetry_tx));
                }
            }

            let loader = DatasetLoader::new(
                Arc::clone(&self.registry),
                self.config.batch_size,
                telemetry_tx.clone(),
            );
            let dataset = job.dataset.clone();
            let handle = join_set.spawn(async move { loader.load_dataset(job).await });
            running.insert(handle.id(), dataset);
        }

        while let Some(result) = join_set.join_next_with_id().await {
            reports.push(Self::settle(result, &mut running, &telemetry_tx));
        }

        reports
    }

    /// Turn a finished task into a report, converting a panic into a failure
    fn settle(
        result: Result<(tokio::task::Id, DatasetReport), JoinError>,
        running: &mut HashMap<tokio::task::Id, String>,
        telemetry_tx: &mpsc::UnboundedSender<TelemetryEvent>,
    ) -> DatasetReport {
        match result {
            Ok((id, report)) => {
                debug_assert!(report.state().is_terminal());
                running.remove(&id);
                report
            }
            Err(join_error) => {
                let dataset = running
                    .remove(&join_error.id())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let error = LoadError::from_join_error(join_error);
                error!(dataset = %dataset, error = %error, "dataset worker panicked");
                let _ = telemetry_tx.send(TelemetryEvent::DatasetFinished {
                    state: JobState::Failed,
                });

                DatasetReport {
                    dataset,
                    outcome: DatasetOutcome::Failed {
                        error,
                        partial: LoadStats::default(),
                    },
                    duration: Default::default(),
                }
            }
        }
    }

    /// Setup progress tracking with progress bars
    fn setup_progress_tracking(
        &self,
        total_datasets: usize,
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.quiet {
            return None;
        }

        let multi_progress = MultiProgress::new();

        let dataset_bar = multi_progress.add(ProgressBar::new(total_datasets as u64));
        dataset_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Datasets:   [{bar:30.cyan/blue}] {pos}/{len} ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let rows_bar = multi_progress.add(ProgressBar::new_spinner());
        rows_bar.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] Rows:       {human_pos} | {per_sec} | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let stats_bar = multi_progress.add(ProgressBar::new(0));
        stats_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Batch Time: {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        // Spawn telemetry processing task
        Some(tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);

                dataset_bar.set_position(stats.datasets_finished() as u64);
                rows_bar.set_position(stats.rows_loaded);
                rows_bar.set_message(format!(
                    "{} batches, {} skipped, {} failed",
                    stats.batches_loaded, stats.datasets_skipped, stats.datasets_failed
                ));

                let (p50, p90, p99) = stats.get_percentiles();
                if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                    stats_bar
                        .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                }
            }

            dataset_bar.finish_with_message("All datasets finished");
            rows_bar.finish();

            let (p50, p90, p99) = stats.get_percentiles();
            if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                stats_bar
                    .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
            } else {
                stats_bar.finish();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sink::testing::RecordingConnector;
    use crate::db::{BatchSink, SinkConnector};
    use crate::error::SinkError;
    use crate::formats::RowBatch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const REGISTRY: &str = r#"{
        "orders": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "amount", "column_position": 1}
        ],
        "customers": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "name", "column_position": 1}
        ],
        "products": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "price", "column_position": 1}
        ],
        "categories": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "label", "column_position": 1}
        ],
        "departments": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "label", "column_position": 1}
        ],
        "order_items": [
            {"column_name": "id", "column_position": 0},
            {"column_name": "qty", "column_position": 1}
        ]
    }"#;

    fn source_with(datasets: &[&str], rows: usize) -> TempDir {
        let root = TempDir::new().unwrap();
        for dataset in datasets {
            let dir = root.path().join(dataset);
            std::fs::create_dir_all(&dir).unwrap();
            let body: String = (0..rows).map(|i| format!("{},{}\n", i, i * 2)).collect();
            std::fs::write(dir.join("part-00000"), body).unwrap();
        }
        root
    }

    fn coordinator(root: &TempDir, sink: Arc<dyn SinkConnector>, max_workers: usize) -> Coordinator {
        let config = LoadConfigBuilder::default()
            .source_dir(root.path().to_path_buf())
            .max_workers(max_workers)
            .batch_size(4)
            .quiet(true)
            .build()
            .unwrap();
        Coordinator::new(
            Arc::new(SchemaRegistry::from_json(REGISTRY).unwrap()),
            sink,
            config,
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_worker_pool_size() {
        assert_eq!(worker_pool_size(10, 4), 4);
        assert_eq!(worker_pool_size(2, 4), 2);
        assert_eq!(worker_pool_size(0, 4), 0);
        assert_eq!(worker_pool_size(3, 0), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = LoadConfigBuilder::default()
            .source_dir(PathBuf::from("/data"))
            .build()
            .unwrap();

        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!config.quiet);
    }

    #[tokio::test]
    async fn test_unknown_and_valid_dataset() {
        let root = source_with(&["orders"], 5);
        let sink = RecordingConnector::default();
        let coordinator = coordinator(&root, Arc::new(sink.clone()), 4);

        let report = coordinator.run(&names(&["ghost", "orders"])).await;

        assert_eq!(report.reports.len(), 2);
        let ghost = report.get("ghost").unwrap();
        assert_eq!(ghost.state(), JobState::Failed);
        assert!(matches!(ghost.outcome.error(), Some(LoadError::SchemaNotFound(_))));
        assert_eq!(report.get("orders").unwrap().state(), JobState::Succeeded);
        assert_eq!(sink.calls_for("orders").len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let root = source_with(&["orders", "customers", "products"], 10);
        let sink = RecordingConnector::failing_on("customers", 1);
        let coordinator = coordinator(&root, Arc::new(sink.clone()), 2);

        let report = coordinator
            .run(&names(&["orders", "customers", "products", "categories"]))
            .await;

        let states: Vec<(&str, JobState)> = report
            .reports
            .iter()
            .map(|r| (r.dataset.as_str(), r.state()))
            .collect();
        assert_eq!(
            states,
            vec![
                ("orders", JobState::Succeeded),
                ("customers", JobState::Failed),
                ("products", JobState::Succeeded),
                ("categories", JobState::Skipped),
            ]
        );
        assert_eq!(report.get("orders").unwrap().outcome.rows_appended(), 10);
        assert_eq!(report.get("customers").unwrap().outcome.rows_appended(), 4);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let root = source_with(&["orders", "customers"], 3);
        let sink = RecordingConnector {
            panic_table: Some("customers".to_string()),
            ..Default::default()
        };
        let coordinator = coordinator(&root, Arc::new(sink.clone()), 4);

        let report = coordinator.run(&names(&["customers", "orders"])).await;

        let customers = report.get("customers").unwrap();
        assert_eq!(customers.state(), JobState::Failed);
        match customers.outcome.error() {
            Some(LoadError::WorkerPanicked { message }) => {
                assert!(message.contains("sink exploded"));
            }
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }
        assert_eq!(report.get("orders").unwrap().state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_duplicate_names_load_once() {
        let root = source_with(&["orders"], 3);
        let sink = RecordingConnector::default();
        let coordinator = coordinator(&root, Arc::new(sink.clone()), 4);

        let report = coordinator.run(&names(&["orders", "orders"])).await;

        assert_eq!(report.reports.len(), 1);
        assert_eq!(sink.calls_for("orders").len(), 1);
        assert_eq!(sink.connect_count(), 1);
    }

    /// Connector tracking how many sinks are open at once
    #[derive(Default)]
    struct ConcurrencyProbe {
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct ProbeSink {
        open: Arc<AtomicUsize>,
    }

    impl Drop for ProbeSink {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SinkConnector for ConcurrencyProbe {
        async fn connect(&self) -> Result<Box<dyn BatchSink>, SinkError> {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(ProbeSink {
                open: Arc::clone(&self.open),
            }))
        }
    }

    #[async_trait]
    impl BatchSink for ProbeSink {
        async fn append_batch(&mut self, _batch: &RowBatch, _table: &str) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_concurrency() {
        let datasets = ["orders", "customers", "products", "categories", "departments", "order_items"];
        let root = source_with(&datasets, 8);
        let probe = Arc::new(ConcurrencyProbe::default());
        let peak = Arc::clone(&probe.peak);
        let coordinator = coordinator(&root, probe, 2);

        let report = coordinator.run(&names(&datasets)).await;

        assert_eq!(report.count(JobState::Succeeded), datasets.len());
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "at most two datasets may load at once, saw {peak}");
        assert!(peak >= 1);
    }
}
