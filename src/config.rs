use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub filtering: FilteringConfig,

    #[serde(default)]
    pub updates: UpdateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Filter lists registered at startup.
    #[serde(default)]
    pub filters: Vec<FilterSource>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilteringConfig {
    #[serde(default = "default_filter_dir")]
    pub filter_dir: PathBuf,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
    /// Line prefixes that mark a line as a comment when counting rules.
    #[serde(default = "default_comment_markers")]
    pub comment_markers: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateConfig {
    #[serde(default = "default_update_interval")]
    pub interval_hours: u64,
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enable")]
    pub enable: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilterSource {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_filter_enabled")]
    pub enabled: bool,
}

// Defaults
fn default_filter_dir() -> PathBuf {
    PathBuf::from("data/filters")
}
fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_size() -> u64 {
    50 * 1024 * 1024
}
fn default_comment_markers() -> Vec<String> {
    vec!["#".to_string()]
}
fn default_update_interval() -> u64 {
    24
}
fn default_concurrent_downloads() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_api_enable() -> bool {
    true
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_filter_enabled() -> bool {
    true
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            filter_dir: default_filter_dir(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_size_bytes: default_max_size(),
            comment_markers: default_comment_markers(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_update_interval(),
            concurrent_downloads: default_concurrent_downloads(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable: default_api_enable(),
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl FilteringConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }
}
