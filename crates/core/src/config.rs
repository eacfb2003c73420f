//! Configuration management for CommandLink services.
//!
//! Secrets (the AES token key and API key) may be left out of the file and
//! provisioned through the environment instead.

use crate::dispatch::DEFAULT_MAX_IN_FLIGHT;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Environment variable overriding [`HubConfig::token_key`]
pub const TOKEN_KEY_ENV: &str = "COMMANDLINK_TOKEN_KEY";

/// Environment variable overriding [`IdentityConfig::api_key`]
pub const API_KEY_ENV: &str = "COMMANDLINK_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Application identity used for routing and authentication
    pub app_id: Uuid,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    /// Shared AES key, normally supplied through [`TOKEN_KEY_ENV`]
    #[serde(default)]
    pub token_key: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/commandhub".to_string(),
            reconnect_delay_ms: 5_000,
            token_key: None,
        }
    }
}

impl HubConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Where a partition reader starts when no checkpoint is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPositionSetting {
    /// Skip the backlog
    #[default]
    Latest,
    /// Replay the partition from its first record
    Earliest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    pub stream_name: String,
    pub consumer_group: String,
    /// Partition ids to read; all partitions when unset
    #[serde(default)]
    pub partition_filter: Option<Vec<String>>,
    #[serde(default)]
    pub start_position: StartPositionSetting,
    pub start_retry_delay_ms: u64,
    /// SQLite checkpoint database; checkpoints stay in memory when unset
    #[serde(default)]
    pub checkpoint_db: Option<PathBuf>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream_name: "commands".to_string(),
            consumer_group: "$Default".to_string(),
            partition_filter: None,
            start_position: StartPositionSetting::Latest,
            start_retry_delay_ms: 2_000,
            checkpoint_db: None,
        }
    }
}

impl StreamSettings {
    pub fn start_retry_delay(&self) -> Duration {
        Duration::from_millis(self.start_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Fill secrets from the process environment when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(TOKEN_KEY_ENV) {
            self.hub.token_key = Some(key);
        }
        if let Some(api_key) = lookup(API_KEY_ENV) {
            self.identity.api_key = api_key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.stream_name.is_empty() {
            return Err(ConfigError::Invalid("stream.stream_name is empty".to_string()));
        }
        if self.stream.consumer_group.is_empty() {
            return Err(ConfigError::Invalid("stream.consumer_group is empty".to_string()));
        }
        if !(self.hub.url.starts_with("ws://") || self.hub.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "hub.url must be a ws:// or wss:// endpoint, got {}",
                self.hub.url
            )));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(ConfigError::Invalid("dispatch.max_in_flight must be positive".to_string()));
        }
        if let Some(key) = &self.hub.token_key {
            if !matches!(key.len(), 16 | 24 | 32) {
                return Err(ConfigError::Invalid(format!(
                    "hub.token_key must be 16, 24 or 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            identity: IdentityConfig {
                app_id: Uuid::nil(),
                api_key: String::new(),
            },
            hub: HubConfig::default(),
            stream: StreamSettings::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}
