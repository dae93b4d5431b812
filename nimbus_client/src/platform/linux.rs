//! Linux tunnel management via `wg-quick` and `wg`.

use super::{ensure_root, run_command, InterfaceState, PlatformError, TunnelPlatform,
    INTERFACE_NAME};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

pub struct LinuxPlatform {
    interface: &'static str,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        Self {
            interface: INTERFACE_NAME,
        }
    }
}

#[async_trait]
impl TunnelPlatform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn config_path(&self) -> PathBuf {
        PathBuf::from(format!("/etc/wireguard/{}.conf", self.interface))
    }

    fn ensure_privileges(&self) -> Result<(), PlatformError> {
        ensure_root("re-run with sudo")
    }

    async fn check_dependencies(&self) -> Result<(), PlatformError> {
        run_command("wg", &["--version"])
            .await
            .map_err(|_| PlatformError::Command {
                program: "wg".to_string(),
                detail: "WireGuard tools not found; install with: apt install wireguard-tools"
                    .to_string(),
            })?;
        Ok(())
    }

    async fn bring_up(&self) -> Result<(), PlatformError> {
        run_command("wg-quick", &["up", self.interface]).await?;
        Ok(())
    }

    async fn tear_down(&self) -> Result<(), PlatformError> {
        // The configuration file is removed right after bring-up, so
        // `wg-quick down` may have nothing to read; deleting the link
        // directly still tears the tunnel down.
        match run_command("wg-quick", &["down", self.interface]).await {
            Ok(_) => Ok(()),
            Err(first) => {
                debug!("wg-quick down failed ({first}), falling back to ip link delete");
                run_command("ip", &["link", "delete", "dev", self.interface])
                    .await
                    .map_err(|_| first)?;
                Ok(())
            }
        }
    }

    async fn query(&self) -> InterfaceState {
        match run_command("wg", &["show", self.interface]).await {
            Ok(output) => InterfaceState::Up(output),
            Err(_) => InterfaceState::Down,
        }
    }
}
