//! Local client settings.
//!
//! A small JSON record under the user configuration directory holding the
//! server base URL, written by `nimbus_client setup` and read by every
//! other subcommand.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server_url: String,
}

/// Errors raised while reading or writing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("settings file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("no user configuration directory available")]
    NoConfigDir,
}

fn settings_path() -> Result<PathBuf, SettingsError> {
    dirs::config_dir()
        .map(|dir| dir.join("nimbus-vpn").join("settings.json"))
        .ok_or(SettingsError::NoConfigDir)
}

impl Settings {
    /// Load saved settings, if any exist.
    pub fn load() -> Result<Option<Self>, SettingsError> {
        let path = settings_path()?;
        let contents = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Persist the settings, creating the directory as needed.
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = settings_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}
