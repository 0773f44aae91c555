//! Application settings.
//!
//! Settings are persisted to `<config dir>/courier/settings.json` (XDG or
//! platform equivalent) and loaded at startup.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AccountBook;

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory could be determined.
    #[error("could not determine a configuration directory")]
    NoConfigDir,

    /// Filesystem failure.
    #[error("settings I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON.
    #[error("invalid settings file {path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Configured accounts.
    #[serde(default)]
    pub accounts: AccountBook,
    /// Whether new-mail and send notifications are delivered.
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accounts: AccountBook::default(),
            notifications_enabled: true,
        }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("", "", "courier").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("settings.json"))
    }

    /// Loads settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }
}
