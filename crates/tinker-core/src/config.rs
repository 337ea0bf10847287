use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configured endpoint.
pub const ENDPOINT_ENV: &str = "TINKER_ENDPOINT";

const APP_DIR: &str = "tinker";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the device.
    pub endpoint: String,
    pub open_timeout_secs: u64,
    /// How often the front-end refreshes the connectivity indicator.
    pub status_poll_ms: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8765".to_string(),
            open_timeout_secs: 10,
            status_poll_ms: 1000,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the user config directory, or defaults if no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TINKER_ENDPOINT` on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint;
        }
    }

    /// Command-line flags win over everything else.
    pub fn apply_cli(&mut self, endpoint: Option<String>, open_timeout_secs: Option<u64>) {
        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        if let Some(secs) = open_timeout_secs {
            self.open_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            bail!("endpoint must be a ws:// or wss:// URL, got {:?}", self.endpoint);
        }
        if self.open_timeout_secs == 0 {
            bail!("open_timeout_secs must be at least 1");
        }
        if self.status_poll_ms == 0 {
            bail!("status_poll_ms must be at least 1");
        }
        Ok(())
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("tinker.log"))
    }
}
