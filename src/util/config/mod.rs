//! conduit configuration system
//!
//! Runtime settings come from, in order of priority:
//!
//! ```text
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables (CONDUIT_*)
//! 3. JSON config file
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use conduit::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env().unwrap_or_default();
//! assert!(config.scheduler.num_workers >= 1);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::LogLevel;

/// Number of core worker threads.
pub const ENV_WORKERS: &str = "CONDUIT_WORKERS";
/// Upper bound on worker threads, helpers included.
pub const ENV_MAX_THREADS: &str = "CONDUIT_MAX_THREADS";
/// Idle timeout in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "CONDUIT_IDLE_TIMEOUT_MS";
/// Work stealing batch size.
pub const ENV_STEAL_BATCH: &str = "CONDUIT_STEAL_BATCH";
/// Log level (`trace`, `debug`, `info`, `warn`, `error`).
pub const ENV_LOG: &str = "CONDUIT_LOG";

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool settings.
    pub scheduler: SchedulerConfig,
    /// Log level used by the binary.
    pub log_level: LogLevel,
}

impl RuntimeConfig {
    /// Defaults overridden by `CONDUIT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](RuntimeConfig::from_env), reading variables through `lookup`.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// File (if given) first, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from whichever variables `lookup` knows.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.scheduler.num_workers = parse_var(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_THREADS) {
            self.scheduler.max_threads = parse_var(ENV_MAX_THREADS, &value)?;
        }
        if let Some(value) = lookup(ENV_IDLE_TIMEOUT_MS) {
            let millis: u64 = parse_var(ENV_IDLE_TIMEOUT_MS, &value)?;
            self.scheduler.idle_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_STEAL_BATCH) {
            self.scheduler.steal_batch = parse_var(ENV_STEAL_BATCH, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_level = parse_var(ENV_LOG, &value)?;
        }
        // A worker count above the default cap raises the cap with it.
        if self.scheduler.max_threads < self.scheduler.num_workers
            && lookup(ENV_MAX_THREADS).is_none()
        {
            self.scheduler.max_threads = self.scheduler.num_workers;
        }
        self.validate()
    }

    /// Check the scheduler invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn parse_var<T>(
    var: &'static str,
    value: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Invalid(String),
}
