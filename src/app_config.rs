//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn tier_fs_runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("tier-fs"));
    }

    dirs::home_dir().map(|path| path.join(".local").join("share").join("tier-fs"))
}

fn default_origin() -> PathBuf {
    PathBuf::from("/srv/tier-fs/origin")
}

fn default_mount_point() -> PathBuf {
    tier_fs_runtime_dir().map_or_else(|| PathBuf::from("/tmp/tier-fs/mnt"), |rd| rd.join("mnt"))
}

const fn default_cold_read_penalty_ms() -> u64 {
    500
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

/// The cache tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// The path to the cache directory. Emptied on every start.
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: tier_fs_runtime_dir()
                .map_or_else(|| PathBuf::from("/tmp/tier-fs/cache"), |rd| rd.join("cache")),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The origin tree to shadow.
    #[serde(default = "default_origin")]
    pub origin: PathBuf,

    #[serde(default)]
    pub cache: CacheConfig,

    /// The mount point for the filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Delay before every origin-tier read, in milliseconds. Zero disables it.
    #[serde(default = "default_cold_read_penalty_ms")]
    pub cold_read_penalty_ms: u64,

    /// The user owning every node. If not specified, the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group owning every node. If not specified, the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache: CacheConfig::default(),
            mount_point: default_mount_point(),
            cold_read_penalty_ms: default_cold_read_penalty_ms(),
            uid: current_uid(),
            gid: current_gid(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// The delay applied before origin-tier reads.
    pub fn cold_read_penalty(&self) -> Duration {
        Duration::from_millis(self.cold_read_penalty_ms)
    }

    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (what, path) in [
            ("Origin", &self.origin),
            ("Cache", &self.cache.path),
            ("Mount point", &self.mount_point),
        ] {
            if !path.is_absolute() {
                errors.push(format!("{what} path '{}' is not absolute.", path.display()));
            }
        }

        if self.cache.path.starts_with(&self.origin) {
            errors.push(format!(
                "Cache path '{}' must not live inside the origin tree '{}'.",
                self.cache.path.display(),
                self.origin.display()
            ));
        }

        if self.mount_point == self.origin || self.mount_point == self.cache.path {
            errors.push(format!(
                "Mount point '{}' must differ from both the origin and the cache.",
                self.mount_point.display()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("tier-fs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("tier-fs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/tier-fs/config.toml"));

        paths
    }

    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Loads the given file, or the first config file found on the search path, or the defaults
    /// when there is none.
    ///
    /// A file that exists but does not parse is an error.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }

        match Self::config_search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No configuration file found, using defaults.");
                Ok(Self::default())
            }
        }
    }
}
