//! CLI configuration.

use anyhow::{Context, Result};
use b4uspend_core::client::default_storage_path;
use b4uspend_core::ClientConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `api_base_url`.
pub const API_URL_ENV: &str = "B4USPEND_API_URL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_cache_keep_unused_secs")]
    pub cache_keep_unused_secs: u64,
    #[serde(default = "default_chat_history_limit")]
    pub chat_history_limit: u32,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_cache_keep_unused_secs() -> u64 {
    60
}

fn default_chat_history_limit() -> u32 {
    b4uspend_core::DEFAULT_CHAT_HISTORY_LIMIT
}

/// Per-user config file, `<config_dir>/b4uspend/config.toml`.
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("b4uspend").join("config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_prefix: default_api_prefix(),
            request_timeout_ms: default_request_timeout_ms(),
            storage_path: default_storage_path(),
            cache_keep_unused_secs: default_cache_keep_unused_secs(),
            chat_history_limit: default_chat_history_limit(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load `config/default.toml`, then the per-user file, else defaults.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("config/default.toml");
        if local.exists() {
            return Self::load_from(&local);
        }
        if let Some(user) = user_config_path().filter(|p| p.exists()) {
            return Self::load_from(&user);
        }
        Ok(Config::default())
    }

    /// Replace the base URL when an override is present and non-empty.
    pub fn override_api_url(&mut self, url: Option<String>) {
        if let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            self.api_base_url = url;
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base_url: self.api_base_url.clone(),
            api_prefix: self.api_prefix.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            storage_path: self.storage_path.clone(),
            keep_unused_for: Duration::from_secs(self.cache_keep_unused_secs),
        }
    }
}
