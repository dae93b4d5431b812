//! Authentication gateway and session management.
//!
//! The gateway is the only caller of the credential store's verification
//! path. Every credential failure collapses to a single error so the API
//! cannot be used to enumerate usernames; store failures are logged with
//! detail here and reported generically.

use crate::store::{AuditAction, AuditEntry, AuditLog, CredentialError, CredentialStore, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors surfaced by the auth gateway.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown user, disabled user, or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Credential store or audit log unavailable
    #[error("authentication backend unavailable")]
    Store(String),
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidCredentials => AuthError::InvalidCredentials,
            other => AuthError::Store(other.to_string()),
        }
    }
}

struct SessionRecord {
    username: String,
    expires_at: Instant,
}

/// In-memory session table with a fixed lifetime per token.
pub struct SessionManager {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mint an opaque token bound to a username. Expired records are swept
    /// here so tokens that are never revalidated do not accumulate.
    pub async fn issue(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let mut guard = self.sessions.lock().await;
        let now = Instant::now();
        guard.retain(|_, record| record.expires_at > now);
        guard.insert(
            token.clone(),
            SessionRecord {
                username: username.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// Resolve a token to its username; expired tokens are pruned and
    /// rejected.
    pub async fn validate(&self, token: &str) -> Option<String> {
        let mut guard = self.sessions.lock().await;
        match guard.get(token) {
            Some(record) if record.expires_at > Instant::now() => {
                Some(record.username.clone())
            }
            Some(_) => {
                guard.remove(token);
                None
            }
            None => None,
        }
    }

    /// Remove a token, returning the username it was bound to.
    pub async fn revoke(&self, token: &str) -> Option<String> {
        self.sessions
            .lock()
            .await
            .remove(token)
            .map(|record| record.username)
    }

    /// Number of session records currently held, expired or not.
    pub async fn active(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Verifies credentials, mints sessions, and writes the audit trail.
pub struct AuthGateway {
    store: Arc<CredentialStore>,
    sessions: SessionManager,
    audit: Arc<AuditLog>,
}

impl AuthGateway {
    pub fn new(store: Arc<CredentialStore>, audit: Arc<AuditLog>, session_ttl: Duration) -> Self {
        Self {
            store,
            sessions: SessionManager::new(session_ttl),
            audit,
        }
    }

    /// Authenticate a username/password pair from `origin`.
    ///
    /// On success the identity's last-login timestamp has been updated, a
    /// `login` audit entry appended, and a fresh session token minted. The
    /// store commits the audit entry and the touch together, so a failed
    /// login leaves neither behind.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        origin: &str,
    ) -> Result<(String, Identity), AuthError> {
        let identity = match self
            .store
            .verify_and_touch(username, password, &self.audit, origin)
            .await
        {
            Ok(identity) => identity,
            Err(CredentialError::InvalidCredentials) => {
                warn!(username, origin, "rejected login");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => {
                warn!(username, origin, "authentication backend failure: {err}");
                return Err(err.into());
            }
        };

        let token = self.sessions.issue(username).await;
        info!(username, origin, "authenticated");
        Ok((token, identity))
    }

    /// Tear down a session. Returns false when the token was unknown or
    /// already expired.
    pub async fn logout(&self, token: &str, origin: &str) -> Result<bool, AuthError> {
        match self.sessions.revoke(token).await {
            Some(username) => {
                self.audit
                    .append(AuditEntry::new(&username, AuditAction::Logout, origin))
                    .await
                    .map_err(|err| AuthError::Store(err.to_string()))?;
                info!(username, origin, "logged out");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve a session token for the API facade.
    pub async fn validate(&self, token: &str) -> Option<String> {
        self.sessions.validate(token).await
    }
}
