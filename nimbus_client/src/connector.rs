//! Connection-apply state machine.
//!
//! Owns the local tunnel lifecycle: Disconnected → Connecting → Connected →
//! Disconnecting → Disconnected, with every error path landing back in
//! Disconnected. Operations take `&mut self`, so at most one runs at a
//! time and the transient states are never observed from outside.

use crate::platform::{InterfaceState, PlatformError, TunnelPlatform};
use nimbus_shared::profile::{ProfileError, TunnelProfile};
use std::path::Path;
use tracing::{debug, info, warn};

/// Connection states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Interface present; carries the platform's diagnostic output
    Connected(String),
    NotConnected,
}

/// Errors surfaced by the connector.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Privilege precondition failed; fatal to the attempt, never retried
    #[error("{0}")]
    Privilege(String),

    /// The received document is not a valid tunnel profile
    #[error("invalid tunnel configuration: {0}")]
    InvalidProfile(#[from] ProfileError),

    /// Bring-up failed; carries the platform command's diagnostic text
    #[error("failed to establish tunnel: {0}")]
    Connect(String),

    /// Teardown failed; the connector still reports Disconnected
    #[error("failed to tear down tunnel: {0}")]
    Disconnect(String),

    /// Local filesystem failure while staging the configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Applies and removes tunnel configurations on the local network stack.
pub struct ClientConnector {
    platform: Box<dyn TunnelPlatform>,
    state: ConnectionState,
}

impl ClientConnector {
    pub fn new(platform: Box<dyn TunnelPlatform>) -> Self {
        Self {
            platform,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply a configuration document.
    ///
    /// Permitted from `Disconnected` and from `Connected` (re-apply over a
    /// stale interface). The document is validated before anything touches
    /// the system, the stale interface is torn down best-effort, and the
    /// staged configuration file is removed on every exit path because it
    /// contains the private key.
    pub async fn connect(&mut self, document: &str) -> Result<(), ConnectorError> {
        TunnelProfile::parse(document)?;
        self.platform
            .ensure_privileges()
            .map_err(|e| ConnectorError::Privilege(e.to_string()))?;

        self.state = ConnectionState::Connecting;
        let path = self.platform.config_path();
        let result = self.apply(&path, document).await;

        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "failed to remove staged configuration: {err}");
            }
        }

        match result {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(platform = self.platform.name(), "tunnel established");
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn apply(&self, path: &Path, document: &str) -> Result<(), ConnectorError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, document).await?;

        // A stale interface from a previous run is normal; ignore the outcome
        if let Err(err) = self.platform.tear_down().await {
            debug!("stale interface teardown: {err}");
        }

        self.platform
            .bring_up()
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))
    }

    /// Tear the tunnel down. Best-effort: a failing teardown command is
    /// reported, but the connector still ends up `Disconnected`.
    pub async fn disconnect(&mut self) -> Result<(), ConnectorError> {
        self.platform
            .ensure_privileges()
            .map_err(|e| ConnectorError::Privilege(e.to_string()))?;

        self.state = ConnectionState::Disconnecting;
        let result = self.platform.tear_down().await;
        self.state = ConnectionState::Disconnected;

        match result {
            Ok(()) => {
                info!(platform = self.platform.name(), "tunnel torn down");
                Ok(())
            }
            Err(err) => Err(ConnectorError::Disconnect(err.to_string())),
        }
    }

    /// Query the interface. Never mutates state and never fails: an absent
    /// interface is a normal `NotConnected` result.
    pub async fn status(&self) -> TunnelStatus {
        match self.platform.query().await {
            InterfaceState::Up(detail) => TunnelStatus::Connected(detail),
            InterfaceState::Down => TunnelStatus::NotConnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn document() -> String {
        TunnelProfile {
            private_key: "priv".to_string(),
            address: Ipv4Addr::new(10, 13, 13, 2),
            dns: "1.1.1.1".to_string(),
            server_public_key: "pub".to_string(),
            endpoint: "vpn.example.com:51820".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            keepalive: 25,
        }
        .render()
    }

    struct FakePlatform {
        dir: PathBuf,
        calls: Mutex<Vec<&'static str>>,
        privileged: bool,
        up_fails: AtomicBool,
        down_fails: AtomicBool,
        interface_up: AtomicBool,
    }

    impl FakePlatform {
        fn new(dir: &TempDir) -> Self {
            Self {
                dir: dir.path().to_path_buf(),
                calls: Mutex::new(Vec::new()),
                privileged: true,
                up_fails: AtomicBool::new(false),
                down_fails: AtomicBool::new(false),
                interface_up: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl TunnelPlatform for FakePlatform {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn config_path(&self) -> PathBuf {
            self.dir.join("wg0.conf")
        }

        fn ensure_privileges(&self) -> Result<(), PlatformError> {
            if self.privileged {
                Ok(())
            } else {
                Err(PlatformError::Privilege("run as root".to_string()))
            }
        }

        async fn check_dependencies(&self) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn bring_up(&self) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push("up");
            assert!(
                self.config_path().exists(),
                "bring_up called without a staged configuration"
            );
            if self.up_fails.load(Ordering::SeqCst) {
                return Err(PlatformError::Command {
                    program: "wg-quick".to_string(),
                    detail: "resolvconf: command not found".to_string(),
                });
            }
            self.interface_up.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn tear_down(&self) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push("down");
            if self.down_fails.load(Ordering::SeqCst) {
                return Err(PlatformError::Command {
                    program: "wg-quick".to_string(),
                    detail: "wg0 is not a WireGuard interface".to_string(),
                });
            }
            self.interface_up.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn query(&self) -> InterfaceState {
            if self.interface_up.load(Ordering::SeqCst) {
                InterfaceState::Up("interface: wg0".to_string())
            } else {
                InterfaceState::Down
            }
        }
    }

    #[tokio::test]
    async fn connect_stages_config_tears_down_stale_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let platform = Box::new(FakePlatform::new(&dir));
        let config_path = platform.config_path();
        let mut connector = ClientConnector::new(platform);

        connector.connect(&document()).await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert!(!config_path.exists(), "private key left on disk");
        assert_eq!(connector.status().await, TunnelStatus::Connected("interface: wg0".to_string()));
    }

    #[tokio::test]
    async fn connect_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut connector = ClientConnector::new(Box::new(FakePlatform::new(&dir)));

        connector.connect(&document()).await.unwrap();
        connector.connect(&document()).await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn failed_bring_up_returns_to_disconnected_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let platform = Box::new(FakePlatform::new(&dir));
        platform.up_fails.store(true, Ordering::SeqCst);
        let config_path = platform.config_path();
        let mut connector = ClientConnector::new(platform);

        let err = connector.connect(&document()).await.unwrap_err();
        assert!(err.to_string().contains("resolvconf"));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(!config_path.exists(), "config must be removed on failure too");
    }

    #[tokio::test]
    async fn disconnect_without_interface_still_ends_disconnected() {
        let dir = TempDir::new().unwrap();
        let platform = Box::new(FakePlatform::new(&dir));
        platform.down_fails.store(true, Ordering::SeqCst);
        let mut connector = ClientConnector::new(platform);

        let err = connector.disconnect().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Disconnect(_)));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn operations_are_accepted_from_every_observable_state() {
        let dir = TempDir::new().unwrap();
        let mut connector = ClientConnector::new(Box::new(FakePlatform::new(&dir)));

        // Both operations are valid from Disconnected and from Connected;
        // the transient states resolve before the calls return
        connector.disconnect().await.unwrap();
        connector.connect(&document()).await.unwrap();
        connector.connect(&document()).await.unwrap();
        connector.disconnect().await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn status_on_fresh_machine_is_not_connected() {
        let dir = TempDir::new().unwrap();
        let connector = ClientConnector::new(Box::new(FakePlatform::new(&dir)));
        assert_eq!(connector.status().await, TunnelStatus::NotConnected);
    }

    #[tokio::test]
    async fn privilege_gate_blocks_before_any_command() {
        let dir = TempDir::new().unwrap();
        let mut platform = FakePlatform::new(&dir);
        platform.privileged = false;
        let platform = Box::new(platform);
        let mut connector = ClientConnector::new(platform);

        let err = connector.connect(&document()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Privilege(_)));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn malformed_document_is_rejected_before_the_gate() {
        let dir = TempDir::new().unwrap();
        let platform = Box::new(FakePlatform::new(&dir));
        let mut connector = ClientConnector::new(platform);

        let err = connector.connect("not a profile").await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidProfile(_)));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }
}
