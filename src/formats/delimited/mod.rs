//! Comma-delimited partition reader

pub mod reader;
