//! Platform-specific tunnel management.
//!
//! Each supported operating system implements [`TunnelPlatform`]; the
//! concrete implementation is selected once at startup by [`detect`], never
//! by branching at the call sites.

pub mod linux;
pub mod macos;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Interface name used by every platform.
pub const INTERFACE_NAME: &str = "wg0";

/// Errors raised by platform operations.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The process lacks the privilege to modify network interfaces
    #[error("{0}")]
    Privilege(String),

    /// The host operating system has no tunnel support here
    #[error("unsupported operating system: {0}")]
    Unsupported(String),

    /// An external command failed or could not be started
    #[error("{program}: {detail}")]
    Command { program: String, detail: String },
}

/// Result of an interface introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceState {
    /// The tunnel interface exists; carries the raw diagnostic output
    Up(String),
    /// No tunnel interface present
    Down,
}

/// Tunnel management operations for one operating system.
///
/// `bring_up` expects the configuration document to already exist at
/// [`config_path`](TunnelPlatform::config_path); the connector owns writing
/// and removing that file.
#[async_trait]
pub trait TunnelPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Where the configuration document must be written before bring-up
    fn config_path(&self) -> PathBuf;

    /// Verify the process holds the privilege needed to modify interfaces
    fn ensure_privileges(&self) -> Result<(), PlatformError>;

    /// Verify the external tunnel tooling is installed
    async fn check_dependencies(&self) -> Result<(), PlatformError>;

    async fn bring_up(&self) -> Result<(), PlatformError>;

    async fn tear_down(&self) -> Result<(), PlatformError>;

    /// Introspect the interface; absence is a normal result, not an error
    async fn query(&self) -> InterfaceState;
}

/// Select the platform implementation for the running host.
pub fn detect() -> Result<Box<dyn TunnelPlatform>, PlatformError> {
    match std::env::consts::OS {
        "linux" => Ok(Box::new(linux::LinuxPlatform::new())),
        "macos" => Ok(Box::new(macos::MacosPlatform::new())),
        other => Err(PlatformError::Unsupported(other.to_string())),
    }
}

/// Run an external command, mapping a non-zero exit to a [`PlatformError`]
/// carrying the command's stderr.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    debug!("running command: {program} {args:?}");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| PlatformError::Command {
            program: program.to_string(),
            detail: format!("failed to execute: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(PlatformError::Command {
            program: program.to_string(),
            detail: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Root check shared by the Unix platforms.
pub(crate) fn ensure_root(hint: &str) -> Result<(), PlatformError> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(PlatformError::Privilege(format!(
            "root privileges are required to manage tunnel interfaces; {hint}"
        )))
    }
}
