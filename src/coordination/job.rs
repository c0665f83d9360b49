use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::SinkConnector;
use crate::error::LoadError;

/// Unit of parallel work: one dataset, where to read it, where to write it
#[derive(Clone)]
pub struct DatasetJob {
    pub dataset: String,
    pub source_dir: PathBuf,
    pub sink: Arc<dyn SinkConnector>,
}

impl fmt::Debug for DatasetJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetJob")
            .field("dataset", &self.dataset)
            .field("source_dir", &self.source_dir)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a dataset job
///
/// `Pending -> Running -> {Succeeded, Skipped, Failed}`; terminal states are
/// final for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Skipped | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Skipped => "SKIPPED",
            JobState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a dataset job appended
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub files: usize,
    pub batches: usize,
    pub rows: u64,
}

/// Terminal outcome of a dataset job
#[derive(Debug)]
pub enum DatasetOutcome {
    Succeeded(LoadStats),
    /// No partition files; the sink was never contacted
    Skipped(LoadError),
    /// `partial` counts what was appended before the failure. It is not rolled back.
    Failed { error: LoadError, partial: LoadStats },
}

impl DatasetOutcome {
    pub fn state(&self) -> JobState {
        match self {
            DatasetOutcome::Succeeded(_) => JobState::Succeeded,
            DatasetOutcome::Skipped(_) => JobState::Skipped,
            DatasetOutcome::Failed { .. } => JobState::Failed,
        }
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            DatasetOutcome::Succeeded(_) => None,
            DatasetOutcome::Skipped(error) | DatasetOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Rows appended, including those of a partial load
    pub fn rows_appended(&self) -> u64 {
        match self {
            DatasetOutcome::Succeeded(stats) | DatasetOutcome::Failed { partial: stats, .. } => {
                stats.rows
            }
            DatasetOutcome::Skipped(_) => 0,
        }
    }
}

/// Per-dataset result of a run
#[derive(Debug)]
pub struct DatasetReport {
    pub dataset: String,
    pub outcome: DatasetOutcome,
    pub duration: Duration,
}

impl DatasetReport {
    pub fn state(&self) -> JobState {
        self.outcome.state()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let detail = match &self.outcome {
            DatasetOutcome::Succeeded(stats) => format!(
                "{} rows in {} batches from {} files",
                stats.rows, stats.batches, stats.files
            ),
            DatasetOutcome::Skipped(error) => error.to_string(),
            DatasetOutcome::Failed { error, partial } if partial.rows > 0 => {
                format!("{} ({} rows already appended)", error, partial.rows)
            }
            DatasetOutcome::Failed { error, .. } => error.to_string(),
        };
        format!(
            "{:<9} {} - {} [{:.2}s]",
            self.state(),
            self.dataset,
            detail,
            self.duration.as_secs_f64()
        )
    }
}

/// Result of a whole run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// In the order the datasets were requested
    pub reports: Vec<DatasetReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn count(&self, state: JobState) -> usize {
        self.reports.iter().filter(|r| r.state() == state).count()
    }

    pub fn rows_appended(&self) -> u64 {
        self.reports.iter().map(|r| r.outcome.rows_appended()).sum()
    }

    pub fn get(&self, dataset: &str) -> Option<&DatasetReport> {
        self.reports.iter().find(|r| r.dataset == dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_states() {
        let ok = DatasetOutcome::Succeeded(LoadStats {
            files: 1,
            batches: 2,
            rows: 15,
        });
        let skipped = DatasetOutcome::Skipped(LoadError::NoPartitions {
            dataset: "orders".to_string(),
            dir: PathBuf::from("/data/orders"),
        });
        let failed = DatasetOutcome::Failed {
            error: LoadError::SchemaNotFound("nope".to_string()),
            partial: LoadStats::default(),
        };

        assert_eq!(ok.state(), JobState::Succeeded);
        assert_eq!(skipped.state(), JobState::Skipped);
        assert_eq!(failed.state(), JobState::Failed);
        assert!(ok.error().is_none());
        assert!(failed.error().is_some());
        assert_eq!(ok.rows_appended(), 15);
        assert!(JobState::Skipped.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_summary_mentions_partial_rows() {
        let report = DatasetReport {
            dataset: "orders".to_string(),
            outcome: DatasetOutcome::Failed {
                error: LoadError::SchemaNotFound("orders".to_string()),
                partial: LoadStats {
                    files: 1,
                    batches: 1,
                    rows: 42,
                },
            },
            duration: Duration::from_millis(1500),
        };

        let line = report.summary();
        assert!(line.starts_with("FAILED"));
        assert!(line.contains("42 rows already appended"));
    }
}
