//! Configuration for the loader
//!
//! Tunable constants live at the top of this module. The environment-derived
//! [`Settings`] are resolved once by the binary and passed down explicitly;
//! nothing below the runner reads the environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on bind parameters in a single INSERT statement
///
/// SQLite caps host parameters at 32,766 and PostgreSQL at 65,535. Using the
/// lower of the two keeps a wide table with a full batch from overflowing
/// either driver; larger batches are split across several statements inside
/// one transaction.
pub const MAX_BIND_PARAMETERS: usize = 32_766;

// ============================================================================
// Worker Configuration
// ============================================================================

/// Maximum rows grouped into one append
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Maximum number of datasets loaded concurrently
pub const DEFAULT_MAX_WORKERS: usize = 4;

// ============================================================================
// Source Layout
// ============================================================================

/// File name prefix of partition files under `<source_dir>/<dataset>/`
pub const PARTITION_PREFIX: &str = "part-";

/// Schema registry location relative to the source directory
pub const REGISTRY_FILE_NAME: &str = "schemas.json";

// ============================================================================
// Environment Keys
// ============================================================================

pub const ENV_SOURCE_DIR: &str = "SRC_BASE_DIR";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASS: &str = "DB_PASS";

/// Connection descriptor for the relational sink
#[derive(Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Process-wide settings resolved from the execution environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub sink: SinkTarget,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary key-value lookup
    ///
    /// Empty values count as missing, except for the password: a sink with
    /// trust authentication legitimately has an empty one, but the key must
    /// still be present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let source_dir = PathBuf::from(required(ENV_SOURCE_DIR)?);
        let host = required(ENV_DB_HOST)?;
        let port_raw = required(ENV_DB_PORT)?;
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid {
                key: ENV_DB_PORT,
                value: port_raw.clone(),
                reason: e.to_string(),
            })?;
        let database = required(ENV_DB_NAME)?;
        let username = required(ENV_DB_USER)?;
        let password = lookup(ENV_DB_PASS).ok_or(ConfigError::Missing(ENV_DB_PASS))?;

        Ok(Self {
            source_dir,
            sink: SinkTarget {
                host,
                port,
                database,
                username,
                password,
            },
        })
    }
}
