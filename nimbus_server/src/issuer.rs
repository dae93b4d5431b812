//! Tunnel configuration issuance.
//!
//! Generates a fresh key pair, reserves a virtual address, records the
//! allocation, and renders the configuration document. The address is
//! reserved by the allocator before the registry row is written and
//! released again if that write fails, so a failed issuance leaves no
//! partial allocation behind.

use crate::allocator::{AddressAllocator, AllocationError};
use crate::store::{Allocation, ConnectionRegistry, RegistryError};
use async_trait::async_trait;
use chrono::Utc;
use nimbus_shared::profile::TunnelProfile;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

/// Errors raised during issuance.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Key generation via the external tunnel binary failed
    #[error("key generation failed: {0}")]
    Keygen(String),

    /// No address available
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Allocation could not be recorded
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A generated tunnel key pair, both halves base64-encoded.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Source of tunnel key pairs. The production implementation shells out to
/// the external tunnel binary; tests substitute a deterministic one.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn generate(&self) -> Result<KeyPair, IssuanceError>;
}

/// Key provider backed by `wg genkey` / `wg pubkey`.
pub struct WgKeygen;

#[async_trait]
impl KeyProvider for WgKeygen {
    async fn generate(&self) -> Result<KeyPair, IssuanceError> {
        let genkey = Command::new("wg")
            .arg("genkey")
            .output()
            .await
            .map_err(|e| IssuanceError::Keygen(format!("failed to run wg genkey: {e}")))?;
        if !genkey.status.success() {
            return Err(IssuanceError::Keygen(format!(
                "wg genkey exited with {}: {}",
                genkey.status,
                String::from_utf8_lossy(&genkey.stderr).trim()
            )));
        }
        let private_key = String::from_utf8_lossy(&genkey.stdout).trim().to_string();

        let mut pubkey = Command::new("wg")
            .arg("pubkey")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IssuanceError::Keygen(format!("failed to run wg pubkey: {e}")))?;
        if let Some(mut stdin) = pubkey.stdin.take() {
            stdin
                .write_all(private_key.as_bytes())
                .await
                .map_err(|e| IssuanceError::Keygen(format!("failed to feed wg pubkey: {e}")))?;
        }
        let output = pubkey
            .wait_with_output()
            .await
            .map_err(|e| IssuanceError::Keygen(format!("wg pubkey did not exit: {e}")))?;
        if !output.status.success() {
            return Err(IssuanceError::Keygen(format!(
                "wg pubkey exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let public_key = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(KeyPair {
            private_key,
            public_key,
        })
    }
}

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedConfig {
    /// Rendered configuration document, ready for the tunnel binary
    pub document: String,
    /// Address bound to the new peer
    pub address: Ipv4Addr,
    /// Public key of the new peer, recorded server-side
    pub public_key: String,
}

/// Peer-independent fields of every issued profile.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub server_public_key: String,
    pub endpoint: String,
    pub dns: String,
}

/// Generates configuration documents for authenticated identities.
pub struct ConfigIssuer {
    keys: Arc<dyn KeyProvider>,
    allocator: AddressAllocator,
    registry: Arc<ConnectionRegistry>,
    settings: IssuerSettings,
}

impl ConfigIssuer {
    pub fn new(
        keys: Arc<dyn KeyProvider>,
        allocator: AddressAllocator,
        registry: Arc<ConnectionRegistry>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            keys,
            allocator,
            registry,
            settings,
        }
    }

    /// Issue a configuration for `username`.
    pub async fn issue(&self, username: &str) -> Result<IssuedConfig, IssuanceError> {
        let keypair = self.keys.generate().await?;
        let address = self.allocator.allocate().await?;

        let record = Allocation {
            username: username.to_string(),
            public_key: keypair.public_key.clone(),
            address,
            created_at: Utc::now(),
        };
        if let Err(err) = self.registry.insert(record).await {
            // Undo the reservation so the failed issuance leaves no trace
            self.allocator.release(address).await;
            error!(username, %address, "failed to record allocation: {err}");
            return Err(err.into());
        }

        let profile = TunnelProfile {
            private_key: keypair.private_key,
            address,
            dns: self.settings.dns.clone(),
            server_public_key: self.settings.server_public_key.clone(),
            endpoint: self.settings.endpoint.clone(),
            allowed_ips: nimbus_shared::profile::DEFAULT_ALLOWED_IPS.to_string(),
            keepalive: nimbus_shared::profile::DEFAULT_KEEPALIVE,
        };

        info!(username, %address, "issued tunnel configuration");
        Ok(IssuedConfig {
            document: profile.render(),
            address,
            public_key: keypair.public_key,
        })
    }

    /// Release an allocation and return its address to the pool.
    ///
    /// Nothing in the request path calls this automatically: whether an
    /// address is released on disconnect or by a lease timeout is an
    /// integration policy, not decided here.
    pub async fn release(&self, address: Ipv4Addr) -> Result<bool, IssuanceError> {
        let removed = self.registry.remove(address).await?;
        if removed.is_some() {
            self.allocator.release(address).await;
            info!(%address, "released allocation");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
