//! Engine configuration
//!
//! Configuration is plain serde data. Every field has a default, so a
//! partial (or absent) file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::defaults;

/// Engine-wide settings shared by every worker in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Iteration bound for loops that do not set one explicitly
    pub default_max_iterations: u32,
    /// Run deadline applied when the caller does not pass one
    pub run_timeout_ms: Option<u64>,
    /// First retry delay; doubled on every further attempt
    pub retry_backoff_base_ms: u64,
    /// Upper bound on any single retry delay
    pub retry_backoff_max_ms: u64,
    /// Keep payloads in `WorkerFinished` events
    pub record_payloads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: defaults::MAX_ITERATIONS,
            run_timeout_ms: None,
            retry_backoff_base_ms: defaults::RETRY_BACKOFF_BASE_MS,
            retry_backoff_max_ms: defaults::RETRY_BACKOFF_MAX_MS,
            record_payloads: defaults::RECORD_PAYLOADS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !fs::try_exists(path).await.map_err(ConfigError::Io)? {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load `switchyard.json` from a directory
    pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(dir.as_ref().join(defaults::CONFIG_FILE)).await
    }

    /// Save configuration as pretty JSON, creating parent directories
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Engine configuration saved to {:?}", path);
        Ok(())
    }

    /// Default run deadline, if any
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    /// Delay before retry number `attempt` (1-based): exponential, capped
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let ms = self
            .retry_backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            default_max_iterations: 3,
            run_timeout_ms: Some(1_500),
            ..Default::default()
        };
        config
            .save(dir.path().join(defaults::CONFIG_FILE))
            .await
            .unwrap();

        let loaded = EngineConfig::load_from_dir(dir.path()).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.run_timeout(), Some(Duration::from_millis(1_500)));
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        tokio::fs::write(&path, r#"{"default_max_iterations": 4}"#)
            .await
            .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.default_max_iterations, 4);
        assert_eq!(config.retry_backoff_base_ms, defaults::RETRY_BACKOFF_BASE_MS);
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = EngineConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let config = EngineConfig {
            retry_backoff_base_ms: 100,
            retry_backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(4), Duration::from_millis(800));
        assert_eq!(config.retry_backoff(5), Duration::from_millis(1_000));
        assert_eq!(config.retry_backoff(60), Duration::from_millis(1_000));
    }
}
