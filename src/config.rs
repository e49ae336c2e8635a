//! Configuration management for Toonkor.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Toonkor";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site access settings.
    pub site: SiteConfig,

    /// Download pipeline settings.
    pub download: DownloadConfig,

    /// File paths.
    pub paths: PathsConfig,
}

/// Site access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Current mirror of the site, without trailing slash.
    pub base_url: String,

    /// Channel page announcing new mirrors.
    pub mirror_channel_url: String,

    /// User agent sent with every request.
    pub user_agent: String,

    /// Whole-request timeout in seconds.
    pub request_timeout_sec: u64,

    /// Delay before each document request in seconds.
    pub delay_between_requests_sec: f64,

    /// Enable debug logging.
    pub debug: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://toonkor434.com".to_string(),
            mirror_channel_url: "https://t.me/s/new_toonkor".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            request_timeout_sec: 30,
            delay_between_requests_sec: 0.0,
            debug: false,
        }
    }
}

impl SiteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

/// Download pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum concurrent page fetches per chapter. 0 uses the host's
    /// available parallelism.
    pub concurrency: usize,

    /// Timeout for a single page transfer in seconds.
    pub fetch_timeout_sec: u64,

    /// How long scraped comic details stay fresh in seconds.
    pub details_ttl_sec: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            fetch_timeout_sec: 60,
            details_ttl_sec: 600,
        }
    }
}

impl DownloadConfig {
    /// Returns the effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_sec)
    }

    pub fn details_ttl(&self) -> Duration {
        Duration::from_secs(self.details_ttl_sec)
    }
}

/// File path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory for downloaded media.
    pub media_directory: Option<PathBuf>,

    /// JSON file holding chapter status.
    pub status_file: Option<PathBuf>,
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Saves configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = url::Url::parse(&self.site.base_url) {
            return Err(ConfigError::InvalidValue {
                key: "site.base_url".to_string(),
                message: e.to_string(),
            });
        }

        if self.site.request_timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "site.request_timeout_sec".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.download.fetch_timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "download.fetch_timeout_sec".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the effective media directory, using config or default.
    pub fn media_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.paths.media_directory {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("media")),
        }
    }

    /// Returns the effective status file, using config or default.
    pub fn status_file(&self) -> Result<PathBuf, ConfigError> {
        match self.paths.status_file {
            Some(ref file) => Ok(file.clone()),
            None => Ok(Self::config_dir()?.join("status.json")),
        }
    }
}
