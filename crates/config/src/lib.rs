//! Configuration for the Tidewater engine.
//!
//! Everything is read from the environment with defaults, so the CLI and the
//! integration tests configure an engine the same way:
//!
//! | Variable                        | Field                | Default   |
//! |---------------------------------|----------------------|-----------|
//! | `TIDEWATER_DATA_DIR`            | `data_dir`           | `data`    |
//! | `TIDEWATER_FLUSH_BYTES`         | `flush_threshold`    | `1048576` |
//! | `TIDEWATER_COMPACTION_TRIGGER`  | `compaction_trigger` | `4`       |
//! | `TIDEWATER_WAL`                 | `wal`                | `true`    |
//! | `TIDEWATER_WAL_SYNC`            | `wal_sync`           | `false`   |

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const ENV_DATA_DIR: &str = "TIDEWATER_DATA_DIR";
pub const ENV_FLUSH_BYTES: &str = "TIDEWATER_FLUSH_BYTES";
pub const ENV_COMPACTION_TRIGGER: &str = "TIDEWATER_COMPACTION_TRIGGER";
pub const ENV_WAL: &str = "TIDEWATER_WAL";
pub const ENV_WAL_SYNC: &str = "TIDEWATER_WAL_SYNC";

/// Default memtable size that triggers a flush: 1 MiB.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024 * 1024;

/// Default live segment count that triggers a background compaction.
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding segments, WAL files and the manifest.
    pub data_dir: PathBuf,

    /// Active memtable size in bytes that triggers a flush. Writes are
    /// rejected with backpressure once this is exceeded while a flush is
    /// still in progress.
    pub flush_threshold: usize,

    /// Live segment count at which a flush schedules a background
    /// compaction. `0` disables automatic compaction.
    pub compaction_trigger: usize,

    /// Log every write before applying it.
    pub wal: bool,

    /// `fsync` the WAL after every append.
    pub wal_sync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            wal: true,
            wal_sync: false,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value (or `None` when unset).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let data_dir = lookup(ENV_DATA_DIR)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let flush_threshold = parse_or(&lookup, ENV_FLUSH_BYTES, defaults.flush_threshold)?;
        if flush_threshold == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_FLUSH_BYTES,
                value: "0".to_string(),
                reason: "flush threshold must be positive".to_string(),
            });
        }

        Ok(Self {
            data_dir,
            flush_threshold,
            compaction_trigger: parse_or(&lookup, ENV_COMPACTION_TRIGGER, defaults.compaction_trigger)?,
            wal: parse_bool_or(&lookup, ENV_WAL, defaults.wal)?,
            wal_sync: parse_bool_or(&lookup, ENV_WAL_SYNC, defaults.wal_sync)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool_or<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected true/false".to_string(),
        }),
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.config.flush_threshold = bytes;
        self
    }

    pub fn compaction_trigger(mut self, segments: usize) -> Self {
        self.config.compaction_trigger = segments;
        self
    }

    pub fn wal(mut self, enabled: bool) -> Self {
        self.config.wal = enabled;
        self
    }

    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.config.wal_sync = sync;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
