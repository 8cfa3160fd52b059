use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub push: PushConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fetched collection may be served without a round trip.
    pub freshness_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub ws_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_seconds: u64,
    /// Interval between client `ping` frames; 0 disables the keepalive.
    pub keepalive_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Lower bound applied to the user's auto-refresh interval.
    pub min_interval_minutes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".into(),
            request_timeout_seconds: 15,
            user_agent: "feedsync/0.1".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_seconds: 60,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/api/ws".into(),
            max_reconnect_attempts: 5,
            reconnect_delay_seconds: 5,
            keepalive_seconds: 30,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_interval_minutes: 5,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_seconds)
    }
}

impl PushConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_seconds > 0).then(|| Duration::from_secs(self.keepalive_seconds))
    }
}

impl RefreshConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_minutes * 60)
    }
}

impl SyncConfig {
    /// Path of the configuration file: `<config dir>/feedsync/config.json`.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join("feedsync");
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir.join("config.json"))
    }

    /// Loads the configuration file, or writes and returns the defaults.
    pub fn load() -> Self {
        match Self::config_file_path().and_then(|path| Self::from_file(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "could not load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "could not write default configuration");
                }
                default_config
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_file_path()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
