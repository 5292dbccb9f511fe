//! Common paths for imgstash
//!
//! - ~/.config/imgstash/config.toml - User configuration
//! - <platform cache dir>/imgstash/ - Cached images

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the imgstash config directory (~/.config/imgstash/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("imgstash");
    fs::create_dir_all(&dir).context("Failed to create config directory")?;
    Ok(dir)
}

/// Get the config file path (~/.config/imgstash/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the directory cache directories are created in
pub fn cache_base_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .context("Could not determine cache directory")?
        .join("imgstash");
    fs::create_dir_all(&base).context("Failed to create cache directory")?;
    Ok(base)
}
