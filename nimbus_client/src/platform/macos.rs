//! macOS tunnel management via `wg-quick` and `wg` (wireguard-tools from
//! Homebrew). `wg-quick` searches /usr/local/etc/wireguard on macOS, so the
//! configuration document lives there rather than /etc/wireguard.

use super::{ensure_root, run_command, InterfaceState, PlatformError, TunnelPlatform,
    INTERFACE_NAME};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct MacosPlatform {
    interface: &'static str,
}

impl MacosPlatform {
    pub fn new() -> Self {
        Self {
            interface: INTERFACE_NAME,
        }
    }
}

#[async_trait]
impl TunnelPlatform for MacosPlatform {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn config_path(&self) -> PathBuf {
        PathBuf::from(format!("/usr/local/etc/wireguard/{}.conf", self.interface))
    }

    fn ensure_privileges(&self) -> Result<(), PlatformError> {
        ensure_root("re-run with sudo")
    }

    async fn check_dependencies(&self) -> Result<(), PlatformError> {
        run_command("wg", &["--version"])
            .await
            .map_err(|_| PlatformError::Command {
                program: "wg".to_string(),
                detail: "WireGuard tools not found; install with: brew install wireguard-tools"
                    .to_string(),
            })?;
        Ok(())
    }

    async fn bring_up(&self) -> Result<(), PlatformError> {
        run_command("wg-quick", &["up", self.interface]).await?;
        Ok(())
    }

    async fn tear_down(&self) -> Result<(), PlatformError> {
        run_command("wg-quick", &["down", self.interface]).await?;
        Ok(())
    }

    async fn query(&self) -> InterfaceState {
        match run_command("wg", &["show", self.interface]).await {
            Ok(output) => InterfaceState::Up(output),
            Err(_) => InterfaceState::Down,
        }
    }
}
