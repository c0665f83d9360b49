//! Dataset jobs and the worker pool that runs them

pub mod coordinator;
pub mod job;
pub mod worker;

pub use coordinator::{Coordinator, LoadConfigBuilder};
pub use job::{DatasetOutcome, DatasetReport, JobState, LoadStats, RunReport};
