//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via WFSM_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timed transition scheduler.
    pub scheduler: SchedulerConfig,
    /// Entity storage.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("WFSM_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        self.scheduler.apply_overrides(var);
        self.storage.apply_overrides(var);
    }

    /// Checks values that would make the daemon misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Timed transition scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the scheduler at all.
    pub enabled: bool,
    /// Delay before the first scan in milliseconds.
    pub warmup_ms: u64,
    /// Delay between scans in milliseconds.
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_ms: 30_000,
            interval_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(enabled) = var("WFSM_SCHEDULER_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Some(warmup) = var("WFSM_SCHEDULER_WARMUP_MS") {
            if let Ok(ms) = warmup.parse() {
                self.warmup_ms = ms;
            }
        }

        if let Some(interval) = var("WFSM_SCHEDULER_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.interval_ms = ms;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the warm-up delay as Duration.
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Returns the scan interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// fsync entity files on every write.
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync: true,
        }
    }
}

impl StorageConfig {
    fn apply_overrides(&mut self, var: &dyn Fn(&str) -> Option<String>) {
        if let Some(dir) = var("WFSM_DATA") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Returns the entity directory path.
    pub fn entities_dir(&self) -> PathBuf {
        self.data_dir.join("entities")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.warmup(), Duration::from_secs(30));
        assert_eq!(config.scheduler.interval(), Duration::from_secs(10));
        assert!(config.storage.fsync);
        assert_eq!(config.storage.entities_dir(), PathBuf::from("./data/entities"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("scheduler:\n  interval_ms: 250\n").unwrap();
        assert_eq!(config.scheduler.interval_ms, 250);
        assert_eq!(config.scheduler.warmup_ms, 30_000);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.scheduler.warmup_ms = 5;
        config.storage.fsync = false;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.scheduler.warmup_ms, 5);
        assert!(!parsed.storage.fsync);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(&overrides(&[
            ("WFSM_SCHEDULER_ENABLED", "false"),
            ("WFSM_SCHEDULER_WARMUP_MS", "0"),
            ("WFSM_SCHEDULER_INTERVAL_MS", "500"),
            ("WFSM_DATA", "/var/lib/wfsm"),
        ]));

        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.warmup_ms, 0);
        assert_eq!(config.scheduler.interval_ms, 500);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/wfsm"));
    }

    #[test]
    fn test_unparseable_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(&overrides(&[("WFSM_SCHEDULER_INTERVAL_MS", "soon")]));
        assert_eq!(config.scheduler.interval_ms, 10_000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.scheduler.interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.scheduler.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::from_file("/nonexistent/wfsm.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }
}
