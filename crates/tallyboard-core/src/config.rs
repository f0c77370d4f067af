//! Configuration loading and typed config structures for Tallyboard.
//!
//! The configuration lives in a YAML file (`tallyboard.yaml` by default).
//! Every field has a default, so an empty file or no file at all yields a
//! working setup: snapshots every 120 seconds into `./snapshots`, 30
//! retained, a 60-minute window of 1-minute buckets, and a 15-second
//! heartbeat.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::Deserialize;

use crate::aggregate::WindowSpec;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TallyConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Snapshot timer, directory, and retention.
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Window and refresh settings for the aggregator.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Live stream settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TallyConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override file values:
    /// - `TALLYBOARD_HOST` overrides `server.host`
    /// - `TALLYBOARD_PORT` overrides `server.port`
    /// - `TALLYBOARD_SNAPSHOT_DIR` overrides `snapshots.directory`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides and validate.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document parses as YAML null rather than an empty map.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TALLYBOARD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TALLYBOARD_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("TALLYBOARD_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "ignoring invalid TALLYBOARD_PORT");
                }
            }
        }
        if let Ok(val) = std::env::var("TALLYBOARD_SNAPSHOT_DIR") {
            self.snapshots.directory = PathBuf::from(val);
        }
    }

    /// Reject values that would make timers spin or the window empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 7] = [
            ("snapshots.interval_seconds", self.snapshots.interval_seconds),
            ("snapshots.retention", u64::from(self.snapshots.retention)),
            ("aggregation.window_minutes", u64::from(self.aggregation.window_minutes)),
            ("aggregation.bucket_seconds", u64::from(self.aggregation.bucket_seconds)),
            (
                "aggregation.baseline_refresh_seconds",
                self.aggregation.baseline_refresh_seconds,
            ),
            ("stream.heartbeat_seconds", self.stream.heartbeat_seconds),
            (
                "stream.subscriber_buffer",
                u64::try_from(self.stream.subscriber_buffer).unwrap_or(u64::MAX),
            ),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: String::from("must be greater than zero"),
                });
            }
        }
        if self.aggregation.window_buckets().is_none() {
            return Err(ConfigError::Invalid {
                field: "aggregation.window_minutes",
                reason: format!(
                    "{} minutes is not a whole number of {}-second buckets",
                    self.aggregation.window_minutes, self.aggregation.bucket_seconds
                ),
            });
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Address to bind (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Snapshot manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding snapshot artifacts.
    #[serde(default = "default_snapshot_dir")]
    pub directory: PathBuf,

    /// Seconds between timed saves.
    #[serde(default = "default_snapshot_interval_seconds")]
    pub interval_seconds: u64,

    /// Number of most recent artifacts kept after each save.
    #[serde(default = "default_retention")]
    pub retention: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: default_snapshot_dir(),
            interval_seconds: default_snapshot_interval_seconds(),
            retention: default_retention(),
        }
    }
}

/// Aggregation window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregationConfig {
    /// Length of the trailing window in minutes. Must span a whole
    /// number of buckets.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    /// Width of one bucket in seconds.
    #[serde(default = "default_bucket_seconds")]
    pub bucket_seconds: u32,

    /// Seconds between historical baseline recomputations.
    #[serde(default = "default_baseline_refresh_seconds")]
    pub baseline_refresh_seconds: u64,

    /// Seconds between unsolicited `stats` pushes. `0` disables them.
    #[serde(default = "default_stats_refresh_seconds")]
    pub stats_refresh_seconds: u64,
}

impl AggregationConfig {
    /// Number of buckets covering `window_minutes`, or `None` when the
    /// window is not a positive whole number of buckets.
    pub fn window_buckets(&self) -> Option<u32> {
        let span_seconds = u64::from(self.window_minutes).checked_mul(60)?;
        let width = u64::from(self.bucket_seconds);
        if span_seconds.checked_rem(width)? != 0 {
            return None;
        }
        let buckets = u32::try_from(span_seconds.checked_div(width)?).ok()?;
        (buckets > 0).then_some(buckets)
    }

    /// The bucketing parameters the aggregator runs with.
    ///
    /// A window [`TallyConfig::validate`] would reject collapses to a
    /// single bucket.
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(
            TimeDelta::seconds(i64::from(self.bucket_seconds)),
            self.window_buckets().unwrap_or(1),
        )
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            bucket_seconds: default_bucket_seconds(),
            baseline_refresh_seconds: default_baseline_refresh_seconds(),
            stats_refresh_seconds: default_stats_refresh_seconds(),
        }
    }
}

/// Live stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamConfig {
    /// Seconds between heartbeat messages.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,

    /// Messages buffered per subscriber before it is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: default_heartbeat_seconds(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8080
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

const fn default_snapshot_interval_seconds() -> u64 {
    120
}

const fn default_retention() -> u32 {
    30
}

const fn default_window_minutes() -> u32 {
    60
}

const fn default_bucket_seconds() -> u32 {
    60
}

const fn default_baseline_refresh_seconds() -> u64 {
    60
}

const fn default_stats_refresh_seconds() -> u64 {
    30
}

const fn default_heartbeat_seconds() -> u64 {
    15
}

const fn default_subscriber_buffer() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}
