//! End-to-end issuance pipeline tests: authentication through allocation to
//! the rendered configuration document, with key generation stubbed out so
//! no external tunnel binary is needed.

use async_trait::async_trait;
use chrono::Utc;
use nimbus_server::allocator::AddressAllocator;
use nimbus_server::auth::AuthGateway;
use nimbus_server::issuer::{ConfigIssuer, IssuanceError, IssuedConfig, IssuerSettings, KeyPair, KeyProvider};
use nimbus_server::store::{Allocation, AuditLog, ConnectionRegistry, CredentialStore};
use nimbus_shared::profile::TunnelProfile;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Deterministic key provider standing in for `wg genkey`/`wg pubkey`.
struct StubKeygen {
    counter: AtomicU32,
}

impl StubKeygen {
    fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl KeyProvider for StubKeygen {
    async fn generate(&self) -> Result<KeyPair, IssuanceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(KeyPair {
            private_key: format!("priv-{n}"),
            public_key: format!("pub-{n}"),
        })
    }
}

struct Harness {
    _dir: TempDir,
    allocator: AddressAllocator,
    registry: Arc<ConnectionRegistry>,
    issuer: Arc<ConfigIssuer>,
    gateway: AuthGateway,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();

    let store = Arc::new(CredentialStore::new(dir.path().join("identities.json")));
    store
        .upsert("alice", "alice@example.com", "p1", true)
        .await
        .unwrap();
    store
        .upsert("bob", "bob@example.com", "p2", true)
        .await
        .unwrap();

    let registry = Arc::new(ConnectionRegistry::new(dir.path().join("connections.json")));
    let allocator = AddressAllocator::new("10.13.13.0/24", []).unwrap();
    let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")));
    let gateway = AuthGateway::new(store, audit, Duration::from_secs(60));

    let issuer = Arc::new(ConfigIssuer::new(
        Arc::new(StubKeygen::new()),
        allocator.clone(),
        Arc::clone(&registry),
        IssuerSettings {
            server_public_key: "server-pub".to_string(),
            endpoint: "vpn.example.com:51820".to_string(),
            dns: "1.1.1.1".to_string(),
        },
    ));

    Harness {
        _dir: dir,
        allocator,
        registry,
        issuer,
        gateway,
    }
}

#[tokio::test]
async fn login_then_issue_walks_the_pool_in_order() {
    let h = harness().await;

    let (token, _) = h.gateway.authenticate("alice", "p1", "local").await.unwrap();
    assert_eq!(h.gateway.validate(&token).await.as_deref(), Some("alice"));

    let issued = h.issuer.issue("alice").await.unwrap();
    assert_eq!(issued.address, Ipv4Addr::new(10, 13, 13, 2));

    let issued = h.issuer.issue("bob").await.unwrap();
    assert_eq!(issued.address, Ipv4Addr::new(10, 13, 13, 3));
    assert_eq!(h.registry.count().await, 2);
}

#[tokio::test]
async fn issued_document_round_trips_and_routes_everything() {
    let h = harness().await;
    let IssuedConfig {
        document, address, ..
    } = h.issuer.issue("alice").await.unwrap();

    let profile = TunnelProfile::parse(&document).unwrap();
    assert_eq!(profile.address, address);
    assert_eq!(profile.server_public_key, "server-pub");
    assert_eq!(profile.endpoint, "vpn.example.com:51820");
    assert_eq!(profile.allowed_ips, "0.0.0.0/0");
    assert_eq!(profile.keepalive, 25);
}

#[tokio::test]
async fn concurrent_issuance_never_duplicates_an_address() {
    let h = harness().await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let issuer = Arc::clone(&h.issuer);
        let username = if i % 2 == 0 { "alice" } else { "bob" };
        handles.push(tokio::spawn(
            async move { issuer.issue(username).await },
        ));
    }

    let mut seen = BTreeSet::new();
    for handle in handles {
        let issued = handle.await.unwrap().unwrap();
        assert!(
            seen.insert(issued.address),
            "duplicate address {}",
            issued.address
        );
    }
    assert_eq!(h.registry.count().await, 40);
}

#[tokio::test]
async fn failed_registry_write_leaves_no_partial_allocation() {
    let h = harness().await;

    // Conflicting row inserted behind the allocator's back, so the first
    // issuance reserves .2 and then fails to record it.
    h.registry
        .insert(Allocation {
            username: "ghost".to_string(),
            public_key: "ghost-pub".to_string(),
            address: Ipv4Addr::new(10, 13, 13, 2),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let err = h.issuer.issue("alice").await.unwrap_err();
    assert!(matches!(err, IssuanceError::Registry(_)));
    assert_eq!(h.registry.count().await, 1);

    // The reservation was rolled back: once the conflicting row is gone,
    // .2 is allocatable again rather than leaked.
    h.registry
        .remove(Ipv4Addr::new(10, 13, 13, 2))
        .await
        .unwrap();
    let issued = h.issuer.issue("alice").await.unwrap();
    assert_eq!(issued.address, Ipv4Addr::new(10, 13, 13, 2));
}

#[tokio::test]
async fn release_returns_the_address_for_reuse() {
    let h = harness().await;

    let first = h.issuer.issue("alice").await.unwrap();
    let second = h.issuer.issue("bob").await.unwrap();
    assert_ne!(first.address, second.address);

    assert!(h.issuer.release(first.address).await.unwrap());
    assert!(!h.issuer.release(first.address).await.unwrap());
    assert_eq!(h.registry.count().await, 1);
    assert_eq!(h.allocator.in_use().await, 1);

    let third = h.issuer.issue("alice").await.unwrap();
    assert_eq!(third.address, first.address);
}

#[tokio::test]
async fn exhausted_pool_surfaces_pool_exhausted() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new(dir.path().join("connections.json")));
    // .2 through .254 already allocated
    let taken: Vec<_> = (2u8..=254).map(|o| Ipv4Addr::new(10, 13, 13, o)).collect();
    let allocator = AddressAllocator::new("10.13.13.0/24", taken.iter().copied()).unwrap();
    let issuer = ConfigIssuer::new(
        Arc::new(StubKeygen::new()),
        allocator,
        registry,
        IssuerSettings {
            server_public_key: "server-pub".to_string(),
            endpoint: "vpn.example.com:51820".to_string(),
            dns: "1.1.1.1".to_string(),
        },
    );

    let err = issuer.issue("alice").await.unwrap_err();
    assert!(matches!(err, IssuanceError::Allocation(_)));
}
