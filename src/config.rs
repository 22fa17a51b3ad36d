//! Daemon configuration
//!
//! Loaded from `config.toml` in the platform config directory
//! (`~/.config/storwatch/config.toml` on Linux). Every field is optional; missing
//! fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::service::places::STANDARD_DIRS;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem types that are auto-mounted.
    pub supported_filesystems: Vec<String>,
    /// Filesystem written by `StorageWatcher::format`.
    pub format_filesystem: String,
    /// Low-space warning threshold, in percent.
    pub free_space_threshold: u64,
    pub free_space_interval_secs: u64,
    /// Application id notifications are posted for.
    pub application: String,
    pub success_icon: String,
    pub error_icon: String,
    pub home_mountpoint: String,
    /// Mount points below this prefix are reported as external storage.
    pub external_prefix: String,
    /// Directories created on every newly mounted device.
    pub standard_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supported_filesystems: vec!["vfat".to_string()],
            format_filesystem: "vfat".to_string(),
            free_space_threshold: 5,
            free_space_interval_secs: 60,
            application: "storwatch".to_string(),
            success_icon: "/usr/share/storwatch/icons/storwatch.svg".to_string(),
            error_icon: "error".to_string(),
            home_mountpoint: "/home".to_string(),
            external_prefix: "/media".to_string(),
            standard_dirs: STANDARD_DIRS
                .iter()
                .map(|dir| dir.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Default location of the configuration file, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "storwatch").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one the default location is tried
    /// and a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> WatchResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> WatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> WatchResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> WatchResult<()> {
        if self.format_filesystem.is_empty() {
            return Err(WatchError::Config("format_filesystem is empty".to_string()));
        }
        if self.free_space_threshold > 100 {
            return Err(WatchError::Config(format!(
                "free_space_threshold {} is not a percentage",
                self.free_space_threshold
            )));
        }
        if self.free_space_interval_secs == 0 {
            return Err(WatchError::Config(
                "free_space_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The allow-list, sorted and without duplicates.
    pub fn sorted_filesystems(&self) -> Vec<String> {
        let mut filesystems = self.supported_filesystems.clone();
        filesystems.sort();
        filesystems.dedup();
        filesystems
    }

    pub fn free_space_interval(&self) -> Duration {
        Duration::from_secs(self.free_space_interval_secs)
    }
}
