//! Persisted server-side state.
//!
//! Each store is a JSON document on disk guarded by a `tokio::sync::Mutex`,
//! loaded once at startup and flushed after every mutation. Requests that
//! race a mutation either see the state before or after it, never a partial
//! write.

pub mod audit;
pub mod credentials;
pub mod registry;

pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use credentials::{CredentialError, CredentialStore, Identity};
pub use registry::{Allocation, ConnectionRegistry, RegistryError};
