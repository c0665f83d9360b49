//! Append-only batch writer
//!
//! A [`SinkConnector`] describes where rows go; every dataset job calls
//! [`SinkConnector::connect`] once and owns the resulting [`BatchSink`]. The
//! sink only ever issues `INSERT` statements: tables must already exist and
//! are never created, replaced or truncated. Appends are not idempotent, so a
//! batch written twice is stored twice.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{MAX_BIND_PARAMETERS, SinkTarget};
use crate::db::pool::{self, Pool, PoolArgs, PoolConnection, quote_ident};
use crate::db::schema::{SqlType, TableColumn, query_table_columns};
use crate::error::SinkError;
use crate::formats::{Record, RowBatch};

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Opens a sink connection for one dataset job
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BatchSink>, SinkError>;
}

/// Appends row batches to tables
#[async_trait]
pub trait BatchSink: Send {
    async fn append_batch(&mut self, batch: &RowBatch, table: &str) -> Result<(), SinkError>;
}

#[async_trait]
impl SinkConnector for SinkTarget {
    async fn connect(&self) -> Result<Box<dyn BatchSink>, SinkError> {
        let pool = pool::pool(PoolArgs::from(self.clone()))
            .await
            .map_err(SinkError::Connect)?;
        Ok(Box::new(PoolSink::new(pool)))
    }
}

/// A batch column paired with the target column type
#[derive(Debug, Clone)]
struct BoundColumn {
    name: String,
    sql_type: SqlType,
}

/// Placeholder syntax of the connected driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    /// `$1, $2, ...` (Postgres)
    Numbered,
    /// `?` (SQLite)
    #[cfg(test)]
    Positional,
}

/// [`BatchSink`] backed by a job-owned connection pool
pub struct PoolSink {
    pool: Pool,
    layouts: HashMap<String, Vec<TableColumn>>,
}

impl PoolSink {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            layouts: HashMap::new(),
        }
    }

    /// Column layout of `table`, queried once per sink
    async fn table_layout(&mut self, table: &str) -> Result<&[TableColumn], SinkError> {
        if !self.layouts.contains_key(table) {
            let columns = query_table_columns(&self.pool, table)
                .await
                .map_err(|source| SinkError::Database {
                    table: table.to_string(),
                    source,
                })?;
            if columns.is_empty() {
                return Err(SinkError::TableNotFound(table.to_string()));
            }
            debug!(table, columns = columns.len(), "resolved table layout");
            self.layouts.insert(table.to_string(), columns);
        }

        Ok(self.layouts.get(table).map(Vec::as_slice).unwrap_or_default())
    }

    /// Write all records of a batch in one transaction
    async fn write_records(
        &self,
        table: &str,
        plan: &[BoundColumn],
        records: &[Record],
    ) -> Result<(), SinkError> {
        let db_error = |source: sqlx::Error| SinkError::Database {
            table: table.to_string(),
            source,
        };
        let rows_per_statement = (MAX_BIND_PARAMETERS / plan.len().max(1)).max(1);

        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        match &mut conn {
            PoolConnection::Postgres(pg) => {
                let mut tx = sqlx::Connection::begin(&mut **pg).await.map_err(db_error)?;
                for chunk in records.chunks(rows_per_statement) {
                    let sql = insert_statement(table, plan, chunk.len(), Placeholder::Numbered);
                    let mut query = sqlx::query(&sql);
                    for record in chunk {
                        query = bind_typed_record(query, table, plan, record)?;
                    }
                    query.execute(&mut *tx).await.map_err(db_error)?;
                }
                tx.commit().await.map_err(db_error)?;
            }
            #[cfg(test)]
            PoolConnection::Sqlite(sqlite) => {
                let mut tx = sqlx::Connection::begin(&mut **sqlite)
                    .await
                    .map_err(db_error)?;
                for chunk in records.chunks(rows_per_statement) {
                    let sql = insert_statement(table, plan, chunk.len(), Placeholder::Positional);
                    let mut query = sqlx::query(&sql);
                    // SQLite applies column affinity itself; bind raw text
                    for record in chunk {
                        for field in &record.fields {
                            query = query.bind(non_empty(field));
                        }
                    }
                    query.execute(&mut *tx).await.map_err(db_error)?;
                }
                tx.commit().await.map_err(db_error)?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BatchSink for PoolSink {
    async fn append_batch(&mut self, batch: &RowBatch, table: &str) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let expected = batch.columns().len();
        if let Some((row, record)) = batch
            .records()
            .iter()
            .enumerate()
            .find(|(_, r)| r.fields.len() != expected)
        {
            return Err(SinkError::MalformedRow {
                table: table.to_string(),
                batch: batch.index(),
                row,
                expected,
                found: record.fields.len(),
            });
        }

        let layout = self.table_layout(table).await?;
        let plan = plan_columns(table, batch.columns(), layout)?;

        self.write_records(table, &plan, batch.records()).await
    }
}

/// Match batch columns to table columns by name
fn plan_columns(
    table: &str,
    batch_columns: &[String],
    layout: &[TableColumn],
) -> Result<Vec<BoundColumn>, SinkError> {
    let mut plan = Vec::with_capacity(batch_columns.len());
    let mut missing = Vec::new();

    for name in batch_columns {
        match layout.iter().find(|col| &col.name == name) {
            Some(col) => plan.push(BoundColumn {
                name: name.clone(),
                sql_type: col.sql_type.clone(),
            }),
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(SinkError::ColumnMismatch {
            table: table.to_string(),
            missing,
        });
    }
    Ok(plan)
}

/// Build `INSERT INTO "t" ("a", "b") VALUES (..), (..)` for `rows` rows
fn insert_statement(table: &str, plan: &[BoundColumn], rows: usize, style: Placeholder) -> String {
    let column_list: Vec<String> = plan.iter().map(|c| quote_ident(&c.name)).collect();

    let mut value_groups = Vec::with_capacity(rows);
    let mut param_idx = 1;
    for _ in 0..rows {
        let placeholders: Vec<String> = plan
            .iter()
            .map(|col| {
                let placeholder = match style {
                    Placeholder::Numbered => format!("${}", param_idx),
                    #[cfg(test)]
                    Placeholder::Positional => "?".to_string(),
                };
                param_idx += 1;

                match (&col.sql_type, style) {
                    (SqlType::Cast(udt), Placeholder::Numbered) => {
                        format!("CAST({} AS {})", placeholder, quote_ident(udt))
                    }
                    _ => placeholder,
                }
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        column_list.join(", "),
        value_groups.join(", ")
    )
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

/// Bind one record with conversions taken from the table layout
fn bind_typed_record<'q>(
    mut query: PgQuery<'q>,
    table: &str,
    plan: &[BoundColumn],
    record: &'q Record,
) -> Result<PgQuery<'q>, SinkError> {
    for (col, value) in plan.iter().zip(&record.fields) {
        query = bind_typed_value(query, value, &col.sql_type).map_err(|expected| {
            SinkError::InvalidValue {
                table: table.to_string(),
                column: col.name.clone(),
                value: value.clone(),
                expected,
            }
        })?;
    }
    Ok(query)
}

/// Bind a single value, or report the type it failed to convert to
fn bind_typed_value<'q>(
    query: PgQuery<'q>,
    value: &'q str,
    sql_type: &SqlType,
) -> Result<PgQuery<'q>, &'static str> {
    // Empty fields are NULL
    if value.is_empty() {
        return Ok(bind_null(query, sql_type));
    }
    let trimmed = value.trim();
    let expected = sql_type.describe();

    Ok(match sql_type {
        SqlType::Boolean => query.bind(parse_bool(trimmed).ok_or(expected)?),
        SqlType::SmallInt => query.bind(trimmed.parse::<i16>().map_err(|_| expected)?),
        SqlType::Integer => query.bind(trimmed.parse::<i32>().map_err(|_| expected)?),
        SqlType::BigInt => query.bind(trimmed.parse::<i64>().map_err(|_| expected)?),
        SqlType::Real => query.bind(trimmed.parse::<f32>().map_err(|_| expected)?),
        SqlType::DoublePrecision => query.bind(trimmed.parse::<f64>().map_err(|_| expected)?),
        SqlType::Uuid => query.bind(uuid::Uuid::parse_str(trimmed).map_err(|_| expected)?),
        SqlType::Timestamp => query.bind(parse_timestamp(trimmed).ok_or(expected)?),
        SqlType::Text | SqlType::Cast(_) => query.bind(value),
    })
}

/// Bind NULL value for the appropriate type
fn bind_null<'q>(query: PgQuery<'q>, sql_type: &SqlType) -> PgQuery<'q> {
    match sql_type {
        SqlType::Boolean => query.bind(None::<bool>),
        SqlType::SmallInt => query.bind(None::<i16>),
        SqlType::Integer => query.bind(None::<i32>),
        SqlType::BigInt => query.bind(None::<i64>),
        SqlType::Real => query.bind(None::<f32>),
        SqlType::DoublePrecision => query.bind(None::<f64>),
        SqlType::Uuid => query.bind(None::<uuid::Uuid>),
        SqlType::Timestamp => query.bind(None::<chrono::NaiveDateTime>),
        SqlType::Text | SqlType::Cast(_) => query.bind(None::<String>),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<chrono::NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
