//! Application configuration.
//!
//! Settings come from an optional TOML file and are then overridden by environment variables.
//! `main` loads `.env` through `dotenvy` before any of this runs.
//!
//! | variable                         | overrides                          |
//! |----------------------------------|------------------------------------|
//! | `CALLSCRIBE_CONFIG`              | config file path                   |
//! | `OPENAI_API_KEY`                 | service API keys left unset        |
//! | `CALLSCRIBE_TRANSCRIPTION_URL`   | `transcription.url`                |
//! | `CALLSCRIBE_SUMMARIZATION_URL`   | `summarization.url`                |
//! | `CALLSCRIBE_ASSET_STORE_URL`     | `asset_store.base_url`             |
//! | `CALLSCRIBE_ASSET_STORE_API_KEY` | `asset_store.api_key`              |
//! | `CALLSCRIBE_WEBHOOK_URL`         | `webhook.url`                      |
//! | `CALLSCRIBE_MAX_WORKERS`         | `pipeline.worker_pool.max_workers` |
//! | `CALLSCRIBE_LOG_DIR`             | `logging.log_dir`                  |
//! | `CALLSCRIBE_LOG`                 | `logging.filter`                   |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::notification::WebhookConfig;
use crate::pipeline::QueueManagerConfig;
use crate::services::{AssetStoreConfig, ServiceEndpointConfig};
use crate::{Error, Result};

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "CALLSCRIBE_CONFIG";

/// Upper bound for `logging.retention_days` (100 years).
pub const MAX_LOG_RETENTION_DAYS: u64 = 36_500;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: QueueManagerConfig,
    #[serde(default = "ServiceEndpointConfig::transcription_default")]
    pub transcription: ServiceEndpointConfig,
    #[serde(default = "ServiceEndpointConfig::summarization_default")]
    pub summarization: ServiceEndpointConfig,
    /// Asset record API. Records are kept in memory when unset.
    #[serde(default)]
    pub asset_store: Option<AssetStoreConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Timeout for media downloads in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_fetch_timeout() -> u64 {
    600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: QueueManagerConfig::default(),
            transcription: ServiceEndpointConfig::transcription_default(),
            summarization: ServiceEndpointConfig::summarization_default(),
            asset_store: None,
            webhook: None,
            fetch_timeout_secs: default_fetch_timeout(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Directory for the rolling log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Filter directive; `RUST_LOG` syntax.
    #[serde(default)]
    pub filter: Option<String>,
    /// Days of log files to keep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_retention_days() -> u64 {
    7
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            filter: None,
            retention_days: default_retention_days(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse config file {}: {}", path.display(), e)))
    }

    /// Load from `path`, else from `CALLSCRIBE_CONFIG`, else defaults; then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            for endpoint in [&mut self.transcription, &mut self.summarization] {
                if endpoint.api_key.is_none() {
                    endpoint.api_key = Some(key.clone());
                }
            }
        }
        if let Some(url) = get("CALLSCRIBE_TRANSCRIPTION_URL") {
            self.transcription.url = url;
        }
        if let Some(url) = get("CALLSCRIBE_SUMMARIZATION_URL") {
            self.summarization.url = url;
        }
        if let Some(url) = get("CALLSCRIBE_ASSET_STORE_URL") {
            match self.asset_store.as_mut() {
                Some(store) => store.base_url = url,
                None => {
                    self.asset_store = Some(AssetStoreConfig {
                        base_url: url,
                        api_key: None,
                        timeout_secs: 30,
                    })
                }
            }
        }
        if let Some(key) = get("CALLSCRIBE_ASSET_STORE_API_KEY") {
            if let Some(store) = self.asset_store.as_mut() {
                store.api_key = Some(key);
            }
        }
        if let Some(url) = get("CALLSCRIBE_WEBHOOK_URL") {
            let webhook = self.webhook.get_or_insert_with(|| WebhookConfig {
                enabled: true,
                ..Default::default()
            });
            webhook.url = url;
        }
        if let Some(workers) = get("CALLSCRIBE_MAX_WORKERS") {
            self.pipeline.worker_pool.max_workers = workers.parse().map_err(|_| {
                Error::config(format!("CALLSCRIBE_MAX_WORKERS is not a number: {}", workers))
            })?;
        }
        if let Some(dir) = get("CALLSCRIBE_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
        if let Some(filter) = get("CALLSCRIBE_LOG") {
            self.logging.filter = Some(filter);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;

        if self.pipeline.executor.status_write_attempts == 0 {
            return Err(Error::config("executor.status_write_attempts must be at least 1"));
        }
        for (name, endpoint) in [
            ("transcription", &self.transcription),
            ("summarization", &self.summarization),
        ] {
            if endpoint.url.trim().is_empty() {
                return Err(Error::config(format!("{}.url cannot be empty", name)));
            }
            if endpoint.model.trim().is_empty() {
                return Err(Error::config(format!("{}.model cannot be empty", name)));
            }
        }
        if let Some(store) = &self.asset_store {
            if store.base_url.trim().is_empty() {
                return Err(Error::config("asset_store.base_url cannot be empty"));
            }
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::config("fetch_timeout_secs cannot be 0"));
        }
        if !(1..=MAX_LOG_RETENTION_DAYS).contains(&self.logging.retention_days) {
            return Err(Error::config(format!(
                "logging.retention_days must be between 1 and {}",
                MAX_LOG_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}
