//! Partition file parsing

pub mod delimited;
pub mod reader;

pub use delimited::reader::open_batches_blocking;
pub use reader::{DelimitedConfig, Record, RowBatch};
