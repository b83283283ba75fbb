use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Workbench settings loaded from a TOML file. Every field has a default, so
/// a missing or empty file yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Suggestion debounce window, milliseconds.
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    /// Backend status poll interval, seconds.
    #[serde(default)]
    pub status_poll_secs: Option<u64>,
    /// Grace period before completed uploads are cleared, seconds.
    #[serde(default)]
    pub upload_clear_secs: Option<u64>,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_page_size() -> usize {
    crate::results::DEFAULT_PAGE_SIZE
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            default_page_size: default_page_size(),
            debounce_ms: None,
            status_poll_secs: None,
            upload_clear_secs: None,
        }
    }
}

impl WorkbenchConfig {
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        self.debounce_ms
            .map_or(crate::suggestions::DEBOUNCE_WINDOW, Duration::from_millis)
    }

    #[must_use]
    pub fn status_poll_interval(&self) -> Duration {
        self.status_poll_secs
            .map_or(crate::workbench::STATUS_POLL_INTERVAL, Duration::from_secs)
    }

    #[must_use]
    pub fn upload_clear_delay(&self) -> Duration {
        self.upload_clear_secs
            .map_or(crate::uploads::CLEAR_DELAY, Duration::from_secs)
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("QUARRY_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("quarry").join("config.toml"))
}
