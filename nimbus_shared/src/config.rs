//! Configuration loading for NimbusVPN components.
//!
//! Server and client each consume a TOML file with serde defaults for every
//! field, so an empty file (or no file at all) yields a runnable development
//! configuration.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file not found
    #[error("configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Server-side configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Interface to bind the API to (default: "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port for the API to listen on (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Virtual address pool; the first host is reserved for the server
    /// (default: "10.13.13.0/24")
    #[serde(default = "default_pool")]
    pub pool: String,

    /// Publicly reachable tunnel endpoint as `host:port`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Base64 public key of the server's tunnel interface
    #[serde(default)]
    pub server_public_key: String,

    /// Resolver address pushed to clients (default: "1.1.1.1")
    #[serde(default = "default_dns")]
    pub dns: String,

    /// Session lifetime in seconds (default: 86400)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Directory holding the identity, registry, and audit files
    /// (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_pool() -> String {
    "10.13.13.0/24".to_string()
}

fn default_endpoint() -> String {
    "127.0.0.1:51820".to_string()
}

fn default_dns() -> String {
    "1.1.1.1".to_string()
}

fn default_session_ttl() -> u64 {
    86400
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
            port: default_port(),
            pool: default_pool(),
            endpoint: default_endpoint(),
            server_public_key: String::new(),
            dns: default_dns(),
            session_ttl_secs: default_session_ttl(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load the server configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load from a file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Ok(config) => Ok(config),
            Err(ConfigError::FileNotFound(_)) => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    /// Path of the identity store file.
    pub fn identities_path(&self) -> PathBuf {
        self.data_dir.join("identities.json")
    }

    /// Path of the active-connection registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("connections.json")
    }

    /// Path of the append-only audit log.
    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_usable() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool, "10.13.13.0/24");
        assert_eq!(config.dns, "1.1.1.1");
        assert_eq!(config.session_ttl_secs, 86400);
    }

    #[test]
    fn load_parses_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000").unwrap();
        writeln!(file, "endpoint = \"vpn.example.com:51820\"").unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.endpoint, "vpn.example.com:51820");
        // Everything else falls back to defaults
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn load_missing_file_is_distinguishable() {
        let err = ServerConfig::load("/nonexistent/nimbus.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
        let config = ServerConfig::load_or_default("/nonexistent/nimbus.toml").unwrap();
        assert_eq!(config.port, 8080);
    }
}
