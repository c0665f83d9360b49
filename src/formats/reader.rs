use std::sync::Arc;

/// A single record (row) from a partition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<String>,
}

impl Record {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// A bounded group of records sharing the dataset's column names
///
/// Fields are aligned to `columns` by position. Nothing guarantees that a
/// record has as many fields as there are columns; the sink rejects rows
/// that do not.
#[derive(Debug, Clone)]
pub struct RowBatch {
    index: usize,
    columns: Arc<[String]>,
    records: Vec<Record>,
}

impl RowBatch {
    pub fn new(index: usize, columns: Arc<[String]>, records: Vec<Record>) -> Self {
        Self {
            index,
            columns,
            records,
        }
    }

    /// Zero-based position of this batch within its file
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(column, value)` pairs of one row
    #[cfg(test)]
    pub fn named_fields(&self, row: usize) -> Option<Vec<(&str, &str)>> {
        self.records.get(row).map(|record| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(record.fields.iter().map(String::as_str))
                .collect()
        })
    }
}

/// Configuration for delimited file reading
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub has_header: bool,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    /// Header-less, comma separated, double-quoted: the partition layout
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: false,
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }
}
