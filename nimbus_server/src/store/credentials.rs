//! Identity store with Argon2 password verifiers.
//!
//! Identities are provisioned out of band (`nimbus_server adduser`) and
//! never deleted here; the only in-band mutation is the last-login touch on
//! a successful verification. Audit entry and touch commit in one critical
//! section that re-checks the verified identity, so a concurrently disabled
//! account can never observe a half-applied login, and the Argon2 work runs
//! on the blocking pool with no lock held.

use super::audit::{AuditAction, AuditEntry, AuditLog};
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised by the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No matching identity, identity disabled, or verifier mismatch.
    /// Deliberately a single variant so callers cannot enumerate usernames.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// I/O error against the backing file
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unserializable store contents
    #[error("credential store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Password hashing failure
    #[error("password hashing error: {0}")]
    Hash(String),
}

/// A persisted identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2id verifier in PHC string format
    pub password_hash: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// JSON-file backed identity store.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Identity>>,
}

// Fixed salt for the dummy verification that runs when no identity matches,
// so the missing-user path costs the same as a real mismatch.
const DUMMY_SALT: &str = "bm9zdWNodXNlcg";

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Load identities from disk. A missing file is an empty store.
    pub async fn load(&self) -> Result<(), CredentialError> {
        let contents = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let identities: Vec<Identity> = serde_json::from_slice(&contents)?;
        let mut guard = self.state.lock().await;
        guard.clear();
        for identity in identities {
            guard.insert(identity.username.clone(), identity);
        }
        info!(count = guard.len(), "loaded identities");
        Ok(())
    }

    async fn flush_locked(
        &self,
        guard: &HashMap<String, Identity>,
    ) -> Result<(), CredentialError> {
        let mut entries: Vec<_> = guard.values().cloned().collect();
        entries.sort_by(|a, b| a.username.cmp(&b.username));
        let serialized = serde_json::to_vec_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serialized).await?;
        Ok(())
    }

    /// Create or replace an identity, hashing the password with a fresh
    /// salt. This is the provisioning path; the core never calls it.
    pub async fn upsert(
        &self,
        username: &str,
        email: &str,
        password: &str,
        enabled: bool,
    ) -> Result<Identity, CredentialError> {
        let candidate = password.to_string();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(candidate.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| CredentialError::Hash(e.to_string()))?
        .map_err(CredentialError::Hash)?;

        let mut guard = self.state.lock().await;
        let identity = Identity {
            id: guard
                .get(username)
                .map(|existing| existing.id)
                .unwrap_or_else(Uuid::new_v4),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash,
            enabled,
            created_at: guard
                .get(username)
                .map(|existing| existing.created_at)
                .unwrap_or_else(Utc::now),
            last_login: guard.get(username).and_then(|existing| existing.last_login),
        };
        guard.insert(username.to_string(), identity.clone());
        self.flush_locked(&guard).await?;
        Ok(identity)
    }

    /// Flip the enabled flag. Returns false if the identity does not exist.
    pub async fn set_enabled(
        &self,
        username: &str,
        enabled: bool,
    ) -> Result<bool, CredentialError> {
        let mut guard = self.state.lock().await;
        match guard.get_mut(username) {
            Some(identity) => {
                identity.enabled = enabled;
                self.flush_locked(&guard).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Verify a password and, on success, append a `login` audit entry and
    /// update the last-login timestamp as one unit: both land or neither
    /// does. The audit entry commits before the touch, and a failed flush
    /// rolls the in-memory touch back, so a failed login never leaves a
    /// persisted timestamp behind.
    ///
    /// The Argon2 work runs on the blocking pool with no lock held, so slow
    /// hashes neither stall the async workers nor serialize unrelated store
    /// operations. The commit section re-checks the identity against the
    /// verified hash, so a concurrent disable or password change between
    /// verification and commit rejects the login.
    ///
    /// Missing identity, disabled identity, and verifier mismatch all
    /// collapse to [`CredentialError::InvalidCredentials`], and the missing
    /// path still runs a verification so its cost matches a real mismatch.
    pub async fn verify_and_touch(
        &self,
        username: &str,
        password: &str,
        audit: &AuditLog,
        origin: &str,
    ) -> Result<Identity, CredentialError> {
        let stored = {
            let guard = self.state.lock().await;
            guard
                .get(username)
                .map(|identity| identity.password_hash.clone())
        };

        let verified_hash = match stored {
            Some(hash) => {
                let stored = hash.clone();
                let candidate = password.to_string();
                let matches = tokio::task::spawn_blocking(move || {
                    let parsed = PasswordHash::new(&stored).map_err(|e| e.to_string())?;
                    Ok(Argon2::default()
                        .verify_password(candidate.as_bytes(), &parsed)
                        .is_ok())
                })
                .await
                .map_err(|e| CredentialError::Hash(e.to_string()))?
                .map_err(CredentialError::Hash)?;
                if !matches {
                    return Err(CredentialError::InvalidCredentials);
                }
                hash
            }
            None => {
                Self::burn_verification(password.to_string()).await;
                return Err(CredentialError::InvalidCredentials);
            }
        };

        let mut guard = self.state.lock().await;
        match guard.get(username) {
            Some(identity) if identity.enabled && identity.password_hash == verified_hash => {}
            _ => return Err(CredentialError::InvalidCredentials),
        }

        audit
            .append(AuditEntry::new(username, AuditAction::Login, origin))
            .await?;

        let identity = guard
            .get_mut(username)
            .ok_or(CredentialError::InvalidCredentials)?;
        let previous = identity.last_login;
        identity.last_login = Some(Utc::now());
        let snapshot = identity.clone();

        if let Err(err) = self.flush_locked(&guard).await {
            if let Some(identity) = guard.get_mut(username) {
                identity.last_login = previous;
            }
            return Err(err);
        }
        Ok(snapshot)
    }

    /// Look up an identity without touching it.
    pub async fn get(&self, username: &str) -> Option<Identity> {
        self.state.lock().await.get(username).cloned()
    }

    /// Number of enabled identities, for status reporting.
    pub async fn enabled_count(&self) -> usize {
        self.state
            .lock()
            .await
            .values()
            .filter(|identity| identity.enabled)
            .count()
    }

    async fn burn_verification(password: String) {
        let outcome = tokio::task::spawn_blocking(move || {
            let salt = SaltString::from_b64(DUMMY_SALT).map_err(|e| e.to_string())?;
            let _ = Argon2::default().hash_password(password.as_bytes(), &salt);
            Ok::<(), String>(())
        })
        .await;
        match outcome {
            Ok(Err(err)) => warn!("dummy salt rejected: {err}"),
            Err(err) => warn!("dummy verification task failed: {err}"),
            Ok(Ok(())) => {}
        }
    }
}
