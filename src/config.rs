use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sweeper::DEFAULT_SWEEP_PERIOD;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Process configuration, read from `COURTSIDE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_interval: Duration,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            sweep_interval: DEFAULT_SWEEP_PERIOD,
            compact_interval: Duration::from_secs(30),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let data_dir = lookup("COURTSIDE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = parse(&lookup, "COURTSIDE_METRICS_PORT", "a port number")?;
        let sweep_secs: Option<u64> =
            parse(&lookup, "COURTSIDE_SWEEP_INTERVAL_SECS", "a positive number of seconds")?;
        let compact_secs: Option<u64> =
            parse(&lookup, "COURTSIDE_COMPACT_INTERVAL_SECS", "a positive number of seconds")?;
        let compact_threshold =
            parse(&lookup, "COURTSIDE_COMPACT_THRESHOLD", "a number of appends")?;

        Ok(Self {
            data_dir,
            metrics_port,
            sweep_interval: seconds(sweep_secs, "COURTSIDE_SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            compact_interval: seconds(compact_secs, "COURTSIDE_COMPACT_INTERVAL_SECS")?
                .unwrap_or(defaults.compact_interval),
            compact_threshold: compact_threshold.unwrap_or(defaults.compact_threshold),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value,
        })
}

/// Zero-length periods would spin.
fn seconds(secs: Option<u64>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match secs {
        Some(0) => Err(ConfigError::Invalid {
            key,
            expected: "a positive number of seconds",
            value: "0".into(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}
