//! Configuration for the Web3 funnel tracker.

use crate::collector::user_agent::UserAgentTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingest API base URL
    pub api_base_url: String,

    /// Registered website identifier
    pub website_id: Option<String>,

    /// Per-site shared secret
    pub api_key: Option<String>,

    /// Queue flushing and retry policy
    pub batch: BatchConfig,

    /// Per-request timeout for the HTTP transport
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Port for the reference ingest server
    pub server_port: u16,

    /// Default log level (overridden by `RUST_LOG`)
    pub log_level: String,

    /// Replacement user-agent rules
    pub user_agent_rules: Option<UserAgentTable>,

    /// Path for storing delivery stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("web3-funnel");

        Self {
            api_base_url: "http://127.0.0.1:3000/api/v1".to_string(),
            website_id: None,
            api_key: None,
            batch: BatchConfig::default(),
            request_timeout: Duration::from_secs(10),
            server_port: 3000,
            log_level: "info".to_string(),
            user_agent_rules: None,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("web3-funnel")
            .join("config.json")
    }

    /// Path of the persisted delivery stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("delivery.json")
    }

    /// User-agent rules in effect.
    pub fn user_agent_table(&self) -> UserAgentTable {
        self.user_agent_rules.clone().unwrap_or_default()
    }
}

/// Queue flushing and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Queue length that triggers an immediate flush, and the batch size
    pub size: usize,
    /// Period of the flush timer
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Consecutive failures that still get a scheduled retry
    pub retry_attempts: u32,
    /// Base retry delay, multiplied by the retry count
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 10,
            timeout: Duration::from_millis(5000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl BatchConfig {
    /// Delay before retry number `retry_count` (linear backoff).
    pub fn retry_delay_for(&self, retry_count: u32) -> Duration {
        self.retry_delay * retry_count
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// Serde support for Duration as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
