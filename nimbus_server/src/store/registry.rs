//! Active-connection registry.
//!
//! One row per issued configuration, keyed by the assigned address. The
//! registry is the persistent record behind the allocator: at startup the
//! allocator is seeded from `addresses()`, and a row insert is rejected if
//! its address is already tracked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// Errors raised by the connection registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// I/O error against the backing file
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unserializable registry contents
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An allocation with this address is already tracked
    #[error("address {0} is already allocated")]
    DuplicateAddress(Ipv4Addr),
}

/// Binding of an identity and public key to a unique virtual address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub username: String,
    pub public_key: String,
    pub address: Ipv4Addr,
    pub created_at: DateTime<Utc>,
}

/// JSON-file backed set of active allocations.
pub struct ConnectionRegistry {
    path: PathBuf,
    state: Mutex<BTreeMap<Ipv4Addr, Allocation>>,
}

impl ConnectionRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load allocations from disk. A missing file is an empty registry.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let contents = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let allocations: Vec<Allocation> = serde_json::from_slice(&contents)?;
        let mut guard = self.state.lock().await;
        guard.clear();
        for allocation in allocations {
            guard.insert(allocation.address, allocation);
        }
        info!(count = guard.len(), "loaded active allocations");
        Ok(())
    }

    async fn flush_locked(
        &self,
        guard: &BTreeMap<Ipv4Addr, Allocation>,
    ) -> Result<(), RegistryError> {
        let entries: Vec<_> = guard.values().cloned().collect();
        let serialized = serde_json::to_vec_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serialized).await?;
        Ok(())
    }

    /// Record an allocation. Fails if the address is already tracked; the
    /// allocator reserves addresses before this runs, so a duplicate here
    /// means the caller bypassed it.
    pub async fn insert(&self, allocation: Allocation) -> Result<(), RegistryError> {
        let mut guard = self.state.lock().await;
        if guard.contains_key(&allocation.address) {
            return Err(RegistryError::DuplicateAddress(allocation.address));
        }
        guard.insert(allocation.address, allocation);
        self.flush_locked(&guard).await?;
        Ok(())
    }

    /// Remove the allocation for an address, returning it if present.
    pub async fn remove(&self, address: Ipv4Addr) -> Result<Option<Allocation>, RegistryError> {
        let mut guard = self.state.lock().await;
        let removed = guard.remove(&address);
        if removed.is_some() {
            self.flush_locked(&guard).await?;
        }
        Ok(removed)
    }

    /// Addresses of all tracked allocations, used to seed the allocator.
    pub async fn addresses(&self) -> Vec<Ipv4Addr> {
        self.state.lock().await.keys().copied().collect()
    }

    /// Number of active allocations, for status reporting.
    pub async fn count(&self) -> usize {
        self.state.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn allocation(username: &str, last_octet: u8) -> Allocation {
        Allocation {
            username: username.to_string(),
            public_key: format!("{username}-pub"),
            address: Ipv4Addr::new(10, 13, 13, last_octet),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_address() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(dir.path().join("connections.json"));

        registry.insert(allocation("alice", 2)).await.unwrap();
        let err = registry.insert(allocation("bob", 2)).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAddress(addr)
            if addr == Ipv4Addr::new(10, 13, 13, 2)));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn allocations_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("connections.json");

        let registry = ConnectionRegistry::new(path.clone());
        registry.insert(allocation("alice", 2)).await.unwrap();
        registry.insert(allocation("bob", 3)).await.unwrap();

        let reloaded = ConnectionRegistry::new(path);
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.addresses().await,
            vec![Ipv4Addr::new(10, 13, 13, 2), Ipv4Addr::new(10, 13, 13, 3)]
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(dir.path().join("connections.json"));
        registry.insert(allocation("alice", 2)).await.unwrap();

        let removed = registry.remove(Ipv4Addr::new(10, 13, 13, 2)).await.unwrap();
        assert_eq!(removed.unwrap().username, "alice");
        let again = registry.remove(Ipv4Addr::new(10, 13, 13, 2)).await.unwrap();
        assert!(again.is_none());
    }
}
