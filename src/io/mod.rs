//! Filesystem access for partition files

pub mod partitions;

pub use partitions::discover_partitions;
