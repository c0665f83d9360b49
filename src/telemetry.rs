use crate::coordination::JobState;

/// Telemetry events sent from dataset workers to the coordinator
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker started processing a dataset
    DatasetStarted,
    /// A batch was appended to the sink
    BatchLoaded { rows: u64, duration_ms: u64 },
    /// Worker reached a terminal state for its dataset
    DatasetFinished { state: JobState },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub datasets_started: usize,
    pub datasets_succeeded: usize,
    pub datasets_skipped: usize,
    pub datasets_failed: usize,
    pub batches_loaded: u64,
    pub rows_loaded: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::DatasetStarted => {
                self.datasets_started += 1;
            }
            TelemetryEvent::BatchLoaded { rows, duration_ms } => {
                self.batches_loaded += 1;
                self.rows_loaded += rows;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::DatasetFinished { state } => match state {
                JobState::Succeeded => self.datasets_succeeded += 1,
                JobState::Skipped => self.datasets_skipped += 1,
                JobState::Failed => self.datasets_failed += 1,
                JobState::Pending | JobState::Running => {}
            },
        }
    }

    pub fn datasets_finished(&self) -> usize {
        self.datasets_succeeded + self.datasets_skipped + self.datasets_failed
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
