//! Coordinator configuration
//!
//! Read from `coordinator.toml` in the data directory when present, then
//! overridden by environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FALLBACK_DELAY_MS: u64 = 800;
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:4000";

const FALLBACK_DELAY_ENV: &str = "TANDEM_FALLBACK_DELAY_MS";
const SERVER_URL_ENV: &str = "TANDEM_SERVER_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid coordinator.toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("No data directory could be resolved")]
    NoDataDir,
}

/// When the per-submission fallback timer stops waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerCancelPolicy {
    /// Cancel once every dispatched variant has produced stream-start.
    #[default]
    AllVariantsStarted,
    /// Cancel on the first stream-start of any variant.
    AnyVariantStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub fallback_delay_ms: u64,
    pub timer_cancel: TimerCancelPolicy,
    pub server_url: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fallback_delay_ms: DEFAULT_FALLBACK_DELAY_MS,
            timer_cancel: TimerCancelPolicy::default(),
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    /// Load `coordinator.toml` from `data_dir` (defaults if absent) and apply env overrides.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = crate::paths::config_file(data_dir);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(FALLBACK_DELAY_ENV) {
            self.fallback_delay_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: FALLBACK_DELAY_ENV,
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup(SERVER_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.server_url = value.trim().to_string();
        }
        Ok(())
    }
}
