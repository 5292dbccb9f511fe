//! Configuration module for imgstash

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::CacheConfiguration;
use crate::fetch::RetryPolicy;
use crate::paths;

/// Bytes per configured megabyte
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the cache directory inside the platform cache dir
    #[serde(default = "default_directory_name")]
    pub directory_name: String,

    /// Total cache size in megabytes
    #[serde(default = "default_capacity_mb")]
    pub capacity_mb: u64,

    /// Re-downloads allowed after a failed attempt
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Minimum download progress (percent) accepted when the size is unknown
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: u8,

    /// Timeout for a single download in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Background eviction interval in seconds (0 = on cache miss only)
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Run eviction before each download
    #[serde(default = "default_evict_on_miss")]
    pub evict_on_miss: bool,

    /// Run eviction once when the cache is opened
    #[serde(default = "default_evict_on_start")]
    pub evict_on_start: bool,
}

fn default_directory_name() -> String {
    "imageCache".to_string()
}

fn default_capacity_mb() -> u64 {
    200
}

fn default_retry_limit() -> u32 {
    1
}

fn default_completion_threshold() -> u8 {
    50
}

fn default_request_timeout() -> u64 {
    30
}

fn default_eviction_interval() -> u64 {
    0 // Miss-triggered only
}

fn default_evict_on_miss() -> bool {
    true
}

fn default_evict_on_start() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_name: default_directory_name(),
            capacity_mb: default_capacity_mb(),
            retry_limit: default_retry_limit(),
            completion_threshold: default_completion_threshold(),
            request_timeout_secs: default_request_timeout(),
            eviction_interval_secs: default_eviction_interval(),
            evict_on_miss: default_evict_on_miss(),
            evict_on_start: default_evict_on_start(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Cache capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Retry behaviour for downloads
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_limit: self.retry_limit,
            completion_threshold: self.completion_threshold.min(100),
        }
    }

    /// Cache settings rooted in the platform cache directory
    pub fn cache_configuration(&self) -> Result<CacheConfiguration> {
        self.cache_configuration_in(paths::cache_base_dir()?)
    }

    /// Cache settings rooted in `base_dir`
    ///
    /// `directory_name` must be a single `[A-Za-z0-9_-]` path component so
    /// eviction can never reach outside `base_dir`.
    pub fn cache_configuration_in(&self, base_dir: PathBuf) -> Result<CacheConfiguration> {
        let name = self.directory_name.as_str();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Invalid directory_name {name:?}: use only letters, digits, '-' and '_'");
        }

        Ok(CacheConfiguration {
            total_capacity_bytes: self.capacity_bytes(),
            directory_name: name.to_string(),
            base_dir,
            evict_on_miss: self.evict_on_miss,
            evict_on_start: self.evict_on_start,
        })
    }
}
