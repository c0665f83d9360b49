//! Database layer - connection pooling, table layout and batch appends

pub mod pool;
pub mod schema;
pub mod sink;

pub use pool::Pool;
pub use sink::{BatchSink, SinkConnector};
