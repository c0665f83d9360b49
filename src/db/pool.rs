//! Adapter between bb8 and the sqlx::Postgres driver.
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgConnection};

use crate::config::{CONNECT_TIMEOUT, PING_TIMEOUT, SinkTarget};

pub type Bb8Connection<'a> = bb8::PooledConnection<'a, ConnectionManager>;

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(bb8::Pool<ConnectionManager>),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

/// Connection that can be either Postgres or SQLite
pub enum PoolConnection {
    Postgres(Bb8Connection<'static>),
    #[cfg(test)]
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

/// Connection pool owned by a single dataset job
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

pub struct PoolArgs {
    pub target: SinkTarget,
    pub min_idle: u32,
    pub max_pool_size: u32,
}

impl From<SinkTarget> for PoolArgs {
    /// A single eagerly-opened connection: each job owns its own
    fn from(target: SinkTarget) -> Self {
        Self {
            target,
            min_idle: 1,
            max_pool_size: 1,
        }
    }
}

/// Open a Postgres pool for the sink target
///
/// The pool connects eagerly so an unreachable sink is reported before any
/// batch is read.
pub async fn pool(args: PoolArgs) -> Result<Pool, sqlx::Error> {
    let PoolArgs {
        target,
        min_idle,
        max_pool_size,
    } = args;
    let connect_options = PgConnectOptions::new()
        .host(&target.host)
        .port(target.port)
        .database(&target.database)
        .username(&target.username)
        .password(&target.password);

    let bb8_pool = bb8::Builder::new()
        .min_idle(min_idle)
        .max_size(max_pool_size.max(min_idle).max(1))
        .retry_connection(false)
        .build(ConnectionManager::new(connect_options))
        .await?;

    Ok(Pool {
        inner: PoolInner::Postgres(bb8_pool),
    })
}

fn run_error(e: bb8::RunError<sqlx::Error>) -> sqlx::Error {
    match e {
        bb8::RunError::User(e) => e,
        bb8::RunError::TimedOut => sqlx::Error::PoolTimedOut,
    }
}

impl Pool {
    /// Open a file-backed SQLite pool for testing
    ///
    /// Each in-memory SQLite connection is its own database, so tests use a
    /// file that every job's pool can open.
    #[cfg(test)]
    pub async fn sqlite_file(path: &std::path::Path) -> Result<Self, sqlx::Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30));
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    pub async fn acquire(&self) -> Result<PoolConnection, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let conn = pool.get_owned().await.map_err(run_error)?;
                Ok(PoolConnection::Postgres(conn))
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let conn = pool.acquire().await?;
                Ok(PoolConnection::Sqlite(conn))
            }
        }
    }

    /// Execute a statement without bind parameters
    #[cfg(test)]
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                sqlx::query(sql).execute(&mut *conn).await?;
                Ok(())
            }
            PoolInner::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
                Ok(())
            }
        }
    }

    /// Fetch `(column_name, data_type, udt_name)` for every column of a table,
    /// in ordinal order
    pub async fn fetch_table_layout(
        &self,
        table_name: &str,
    ) -> Result<Vec<(String, String, String)>, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                let sql = r#"
                    SELECT column_name::text, data_type::text, udt_name::text
                    FROM information_schema.columns
                    WHERE table_schema = current_schema()
                    AND table_name = $1
                    ORDER BY ordinal_position
                "#;
                sqlx::query_as::<_, (String, String, String)>(sql)
                    .bind(table_name)
                    .fetch_all(&mut *conn)
                    .await
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let pragma_sql = format!("PRAGMA table_info({})", quote_ident(table_name));
                let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
                    sqlx::query_as(&pragma_sql).fetch_all(pool).await?;

                Ok(rows
                    .into_iter()
                    .map(|(_, name, declared, ..)| (name, declared.clone(), declared))
                    .collect())
            }
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// Wrap the connect options so that we can implement the bb8::ManageConnection trait.
pub struct ConnectionManager {
    connect_options: PgConnectOptions,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the specified connect options.
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self { connect_options }
    }
}

impl bb8::ManageConnection for ConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_options.connect())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)?
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::Connection::ping(conn))
            .await
            // Convert tokio timeouts into sqlx pool timeouts.
            .map_err(|_| sqlx::Error::PoolTimedOut)
            // Make sure that we also look at the actual ping result
            .and_then(|result| result)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx::PgConnection provides no non-async way to check for closed/broken connections.
        false
    }
}
