//! Virtual address allocator.
//!
//! Owns the pool of client addresses carved out of the configured CIDR
//! block. The first host is reserved for the server's own tunnel interface;
//! everything after it is handed out lowest-free-first, so released
//! addresses are recycled instead of leaking the way an
//! increment-past-the-maximum counter would.
//!
//! All pool state sits behind one mutex: a reservation is complete before
//! `allocate` returns, so two concurrent calls can never settle on the same
//! address.

use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors raised by the allocator.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The configured pool is not a usable IPv4 network
    #[error("invalid address pool {pool}: {message}")]
    InvalidPool { pool: String, message: String },

    /// Every address in the pool is in use
    #[error("address pool exhausted")]
    PoolExhausted,
}

/// Serialized allocator over a fixed pool of host addresses.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    inner: Arc<Mutex<AllocatorState>>,
}

#[derive(Debug)]
struct AllocatorState {
    network: Ipv4Net,
    in_use: BTreeSet<Ipv4Addr>,
}

impl AddressAllocator {
    /// Create an allocator from a CIDR string (e.g. "10.13.13.0/24"),
    /// seeding the in-use set from already-recorded allocations.
    pub fn new(
        pool: &str,
        in_use: impl IntoIterator<Item = Ipv4Addr>,
    ) -> Result<Self, AllocationError> {
        let network: Ipv4Net = pool.parse().map_err(|e| AllocationError::InvalidPool {
            pool: pool.to_string(),
            message: format!("{e}"),
        })?;

        // Need the server host plus at least one client address
        if network.hosts().nth(1).is_none() {
            return Err(AllocationError::InvalidPool {
                pool: pool.to_string(),
                message: "pool contains no client addresses".to_string(),
            });
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(AllocatorState {
                network,
                in_use: in_use.into_iter().collect(),
            })),
        })
    }

    /// Reserve the lowest free client address.
    pub async fn allocate(&self) -> Result<Ipv4Addr, AllocationError> {
        let mut guard = self.inner.lock().await;
        // Skip the first host; it belongs to the server
        let candidate = guard
            .network
            .hosts()
            .skip(1)
            .find(|addr| !guard.in_use.contains(addr));

        match candidate {
            Some(addr) => {
                guard.in_use.insert(addr);
                debug!(%addr, "allocated address");
                Ok(addr)
            }
            None => Err(AllocationError::PoolExhausted),
        }
    }

    /// Return an address to the pool. Releasing an address that was never
    /// allocated, or one outside the pool, is logged and ignored.
    pub async fn release(&self, addr: Ipv4Addr) {
        let mut guard = self.inner.lock().await;
        if !guard.network.contains(&addr) {
            warn!(%addr, "attempted to release address outside of pool");
            return;
        }
        if !guard.in_use.remove(&addr) {
            warn!(%addr, "attempted to release address that was not allocated");
        }
    }

    /// Number of reserved addresses.
    pub async fn in_use(&self) -> usize {
        self.inner.lock().await.in_use.len()
    }
}
