use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LoadError;
use crate::formats::reader::{DelimitedConfig, Record, RowBatch};

/// Rows reserved up front per batch; larger batches grow as rows arrive
const INITIAL_BATCH_CAPACITY: usize = 1024;

/// Open a partition file as a lazy sequence of row batches
///
/// Every batch holds `batch_size` records except possibly the last one. An
/// empty file yields no batches. The sequence is single-pass; reopen the
/// file to read it again.
pub fn open_batches(
    path: impl AsRef<Path>,
    columns: Arc<[String]>,
    config: &DelimitedConfig,
    batch_size: usize,
) -> Result<BatchReader, LoadError> {
    let path = path.as_ref().to_path_buf();
    let reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(config.has_header)
        // Field counts are not validated here; misaligned rows surface at the sink.
        .flexible(true)
        .from_path(&path)
        .map_err(|source| LoadError::FileRead {
            path: path.clone(),
            source,
        })?;

    Ok(BatchReader {
        path,
        columns,
        records: reader.into_records(),
        batch_size: batch_size.max(1),
        next_index: 0,
        finished: false,
    })
}

/// Streaming batch iterator over one delimited file
pub struct BatchReader {
    path: PathBuf,
    columns: Arc<[String]>,
    records: csv::StringRecordsIntoIter<File>,
    batch_size: usize,
    next_index: usize,
    finished: bool,
}

impl BatchReader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next batch on tokio's blocking pool, handing the reader back
    ///
    /// Parsing a batch does synchronous file reads; running it here keeps
    /// the async worker threads free for the sink and telemetry.
    pub async fn next_blocking(mut self) -> Result<(Self, Option<Result<RowBatch, LoadError>>), LoadError> {
        tokio::task::spawn_blocking(move || {
            let next = self.next();
            (self, next)
        })
        .await
        .map_err(LoadError::from_join_error)
    }
}

/// [`open_batches`] on tokio's blocking pool
pub async fn open_batches_blocking(
    path: PathBuf,
    columns: Arc<[String]>,
    config: DelimitedConfig,
    batch_size: usize,
) -> Result<BatchReader, LoadError> {
    tokio::task::spawn_blocking(move || open_batches(path, columns, &config, batch_size))
        .await
        .map_err(LoadError::from_join_error)?
}

impl Iterator for BatchReader {
    type Item = Result<RowBatch, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut records = Vec::with_capacity(self.batch_size.min(INITIAL_BATCH_CAPACITY));
        while records.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => records.push(Record::new(record.iter())),
                Some(Err(source)) => {
                    self.finished = true;
                    return Some(Err(LoadError::FileRead {
                        path: self.path.clone(),
                        source,
                    }));
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch = RowBatch::new(self.next_index, Arc::clone(&self.columns), records);
        self.next_index += 1;
        Some(Ok(batch))
    }
}
