//! Collector configuration
//!
//! Every field has a default so an empty (or missing) TOML file yields a working
//! configuration for a stock OpenZFS-on-Linux host.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub arc: ArcConfig,
    pub datasets: DatasetsConfig,
    pub pool_io: PoolIoConfig,
    pub txg: TxgConfig,
    pub reads: ReadsConfig,
    pub events: EventsConfig,
    pub debug_messages: DebugMessagesConfig,
    pub subprocess: SubprocessConfig,
}

/// Locations of the kernel statistics tree and the pool tooling
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub kstat_root: PathBuf,
    pub zpool: String,
    pub zfs: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            kstat_root: PathBuf::from("/proc/spl/kstat/zfs"),
            zpool: "/sbin/zpool".to_string(),
            zfs: "zfs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ArcConfig {
    pub interval_ms: u64,
    pub history: usize,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            history: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatasetsConfig {
    pub interval_ms: u64,
    pub history: usize,
    /// Multiplier applied to `interval_ms` while the objset file is missing
    pub unavailable_backoff: u32,
}

impl Default for DatasetsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            history: 3600,
            unavailable_backoff: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolIoConfig {
    pub report_interval_secs: u64,
    pub history: usize,
    pub utilization_interval_secs: u64,
}

impl Default for PoolIoConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 5,
            history: 300,
            utilization_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TxgConfig {
    pub interval_ms: u64,
    pub history: usize,
}

impl Default for TxgConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            history: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReadsConfig {
    pub interval_ms: u64,
    pub queue: usize,
}

impl Default for ReadsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            queue: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    pub queue: usize,
    pub poll_ms: u64,
    /// Indented event fields that are dropped as noise
    pub denylist: Vec<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue: 100,
            poll_ms: 1000,
            denylist: ["version", "history_hostname", "pool_guid", "history_time", "time"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DebugMessagesConfig {
    pub interval_ms: u64,
    pub queue: usize,
}

impl Default for DebugMessagesConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            queue: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SubprocessConfig {
    pub restart_backoff_secs: u64,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            restart_backoff_secs: 5,
        }
    }
}

impl SubprocessConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, and a parse or
    /// validation error if its content is not acceptable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject intervals and capacities of zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("arc.interval_ms", self.arc.interval_ms),
            ("datasets.interval_ms", self.datasets.interval_ms),
            ("pool_io.report_interval_secs", self.pool_io.report_interval_secs),
            (
                "pool_io.utilization_interval_secs",
                self.pool_io.utilization_interval_secs,
            ),
            ("txg.interval_ms", self.txg.interval_ms),
            ("reads.interval_ms", self.reads.interval_ms),
            ("events.poll_ms", self.events.poll_ms),
            ("debug_messages.interval_ms", self.debug_messages.interval_ms),
            (
                "subprocess.restart_backoff_secs",
                self.subprocess.restart_backoff_secs,
            ),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be > 0",
                    name
                )));
            }
        }

        let capacities = [
            ("arc.history", self.arc.history),
            ("datasets.history", self.datasets.history),
            ("pool_io.history", self.pool_io.history),
            ("txg.history", self.txg.history),
            ("reads.queue", self.reads.queue),
            ("events.queue", self.events.queue),
            ("debug_messages.queue", self.debug_messages.queue),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be > 0",
                    name
                )));
            }
        }

        if self.datasets.unavailable_backoff == 0 {
            return Err(ConfigError::ValidationError(
                "datasets.unavailable_backoff must be > 0".to_string(),
            ));
        }
        if self.paths.zpool.is_empty() || self.paths.zfs.is_empty() {
            return Err(ConfigError::ValidationError(
                "paths.zpool and paths.zfs must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.arc.history, 300);
        assert_eq!(config.datasets.unavailable_backoff, 10);
        assert_eq!(config.subprocess.restart_backoff(), Duration::from_secs(5));
        assert!(config.events.denylist.contains(&"pool_guid".to_string()));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [txg]
            history = 60

            [paths]
            zpool = "/usr/sbin/zpool"
            "#,
        )
        .unwrap();
        assert_eq!(config.txg.history, 60);
        assert_eq!(config.txg.interval_ms, 1000);
        assert_eq!(config.paths.zpool, "/usr/sbin/zpool");
        assert_eq!(config.paths.kstat_root, PathBuf::from("/proc/spl/kstat/zfs"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Config::from_toml_str("[arc]\ninterval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("arc.interval_ms"));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let err = Config::from_toml_str("[reads]\nqueue = 0\n").unwrap_err();
        assert!(err.to_string().contains("reads.queue"));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = Config::from_toml_str("[arc\ninterval_ms = 1").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[events]\nqueue = 5").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.events.queue, 5);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/zview.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
