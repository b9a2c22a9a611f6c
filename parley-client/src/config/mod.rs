//! Client configuration
//!
//! Configuration lives in `config.json` under the platform config directory
//! (`~/.config/parley/config.json` on Linux). Every field has a default, so a
//! missing or partial file still yields a usable configuration.

pub mod audio;
pub mod settings;

use std::fs;
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;

use parley_common::DEFAULT_SIGNALING_URL;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use audio::{DeviceSelection, SYSTEM_DEFAULT_DEVICE};
pub use settings::TimeoutSettings;

use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME};

/// File permissions for the config file on Unix (owner read/write only)
#[cfg(unix)]
const CONFIG_FILE_MODE: u32 = 0o600;

/// Errors raised while persisting configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine config directory")]
    NoConfigDir,

    #[error("failed to create config directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write config: {0}")]
    Write(std::io::Error),

    #[error("failed to set config permissions: {0}")]
    Permissions(std::io::Error),
}

/// Persistent client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling endpoint
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Local participant id (empty = generate on first run)
    #[serde(default)]
    pub participant_id: String,

    #[serde(default)]
    pub devices: DeviceSelection,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            participant_id: String::new(),
            devices: DeviceSelection::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Get the platform-specific config file path
    ///
    /// Returns None if the config directory cannot be determined.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load config from the default location, or defaults if unavailable
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`
    ///
    /// Returns defaults if the file doesn't exist, cannot be read, or
    /// contains invalid JSON.
    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ClientConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable config file, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save config to `path` with restrictive permissions
    ///
    /// Creates the parent directory if it doesn't exist. On Unix systems,
    /// sets file permissions to 0o600 (owner read/write only).
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::CreateDir)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(ConfigError::Write)?;

        #[cfg(unix)]
        Self::set_config_permissions(path)?;

        Ok(())
    }

    /// Set config file permissions to owner read/write only on Unix systems
    #[cfg(unix)]
    fn set_config_permissions(path: &Path) -> Result<(), ConfigError> {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path)
            .map_err(ConfigError::Permissions)?
            .permissions();
        perms.set_mode(CONFIG_FILE_MODE);
        fs::set_permissions(path, perms).map_err(ConfigError::Permissions)
    }
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert!(config.participant_id.is_empty());
        assert!(config.devices.is_default_input());
        assert_eq!(config.timeouts, TimeoutSettings::default());
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ClientConfig::load_from(&dir.path().join("missing.json"));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_invalid_json_returns_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");
        assert_eq!(ClientConfig::load_from(&path), ClientConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let config = ClientConfig {
            signaling_url: "ws://relay.example:3001".to_string(),
            participant_id: "alice".to_string(),
            devices: DeviceSelection {
                input_device: "USB Microphone".to_string(),
                output_device: "Headphones".to_string(),
            },
            timeouts: TimeoutSettings {
                request_ms: 500,
                ..Default::default()
            },
        };
        config.save_to(&path).expect("save");

        assert_eq!(ClientConfig::load_from(&path), config);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        ClientConfig::default().save_to(&path).expect("save");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, CONFIG_FILE_MODE);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"participant_id": "bob"}"#).expect("write");

        let config = ClientConfig::load_from(&path);
        assert_eq!(config.participant_id, "bob");
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
    }
}
