//! Store configuration.
//!
//! # Responsibility
//! - Describe where the database lives and how connections are tuned.
//! - Carry optional logging settings for callers that bootstrap logging.
//!
//! # Invariants
//! - `db_path = None` always means an in-memory database.
//! - A zero busy timeout falls back to the default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const ENV_DB_PATH: &str = "VELLUM_DB_PATH";
const ENV_BUSY_TIMEOUT_MS: &str = "VELLUM_BUSY_TIMEOUT_MS";
const ENV_LOG_LEVEL: &str = "VELLUM_LOG_LEVEL";
const ENV_LOG_DIR: &str = "VELLUM_LOG_DIR";

/// Connection and logging settings for one store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file path. `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    /// How long a writer waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Log level passed to `init_logging`, when logging is wanted.
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_level: None,
            log_dir: None,
        }
    }
}

impl StoreConfig {
    /// Builds a config from `VELLUM_*` environment variables.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Effective busy timeout.
    pub fn busy_timeout(&self) -> Duration {
        if self.busy_timeout_ms == 0 {
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.busy_timeout_ms)
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Self {
            db_path: non_empty(ENV_DB_PATH).map(PathBuf::from),
            busy_timeout_ms: non_empty(ENV_BUSY_TIMEOUT_MS)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.busy_timeout_ms),
            log_level: non_empty(ENV_LOG_LEVEL),
            log_dir: non_empty(ENV_LOG_DIR).map(PathBuf::from),
        }
    }
}
