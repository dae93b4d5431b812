//! Append-only audit log.
//!
//! One JSON object per line. The log is written by the auth gateway on
//! login and logout and is never read back by the server; operators tail it
//! directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Login,
    Logout,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub username: String,
    pub action: AuditAction,
    /// Remote address the request originated from
    pub origin: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(username: &str, action: AuditAction, origin: &str) -> Self {
        Self {
            username: username.to_string(),
            action,
            origin: origin.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// JSON-lines audit sink. The lock serializes appends so concurrent logins
/// never interleave partial lines.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, entry: AuditEntry) -> Result<(), std::io::Error> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
