use crate::db::pool::Pool;

/// How a column's raw text is converted before it is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    /// TEXT, VARCHAR and CHAR: bound as-is
    Text,
    Uuid,
    Timestamp,
    /// Bound as text and converted by the server with `CAST(... AS <udt>)`
    Cast(String),
}

impl SqlType {
    /// Classify a column from its `information_schema` data type and udt name
    pub fn from_catalog(data_type: &str, udt_name: &str) -> Self {
        match data_type.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "SMALLINT" | "INT2" => SqlType::SmallInt,
            "INTEGER" | "INT" | "INT4" => SqlType::Integer,
            "BIGINT" | "INT8" => SqlType::BigInt,
            "REAL" | "FLOAT4" => SqlType::Real,
            "DOUBLE PRECISION" | "FLOAT8" => SqlType::DoublePrecision,
            "TEXT" | "CHARACTER VARYING" | "VARCHAR" | "CHARACTER" | "CHAR" | "BPCHAR" => {
                SqlType::Text
            }
            "UUID" => SqlType::Uuid,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => SqlType::Timestamp,
            _ => SqlType::Cast(udt_name.to_string()),
        }
    }

    /// Name used in conversion error messages
    pub fn describe(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Uuid => "UUID",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Cast(_) => "server-cast value",
        }
    }
}

/// A column of an existing sink table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub sql_type: SqlType,
}

/// Query the column layout of an existing table
///
/// Returns an empty list when the table does not exist.
pub async fn query_table_columns(pool: &Pool, table_name: &str) -> Result<Vec<TableColumn>, sqlx::Error> {
    let rows = pool.fetch_table_layout(table_name).await?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, udt_name)| TableColumn {
            sql_type: SqlType::from_catalog(&data_type, &udt_name),
            name,
        })
        .collect())
}
