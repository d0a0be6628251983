//! Audit trail for owner-facing actions
//!
//! Each entry is written to the `audit_log` table and mirrored to `tracing`.
//! Detail payloads are sanitized first: values under sensitive keys are
//! replaced by a short sha256 fingerprint so the trail can correlate tokens
//! without storing them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::db::Database;
use crate::types::Platform;

const SENSITIVE_KEY_PARTS: [&str; 5] = ["token", "secret", "code", "password", "authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Connect,
    Callback,
    Publish,
    Refresh,
    InsightFetch,
    Disconnect,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Connect => "connect",
            AuditAction::Callback => "callback",
            AuditAction::Publish => "publish",
            AuditAction::Refresh => "refresh",
            AuditAction::InsightFetch => "insight_fetch",
            AuditAction::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub owner_id: Option<String>,
    pub platform: Option<Platform>,
    pub action: String,
    pub outcome: String,
    pub detail: Option<Value>,
    pub created_at: i64,
}

/// Writes sanitized audit entries; persistence failures are logged, never raised
#[derive(Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        owner_id: Option<&str>,
        platform: Option<Platform>,
        action: AuditAction,
        outcome: &str,
        detail: Option<Value>,
    ) {
        let entry = AuditEntry {
            owner_id: owner_id.map(str::to_string),
            platform,
            action: action.as_str().to_string(),
            outcome: outcome.to_string(),
            detail: detail.map(sanitize),
            created_at: chrono::Utc::now().timestamp(),
        };

        info!(
            owner_id = entry.owner_id.as_deref().unwrap_or("-"),
            platform = platform.map(|p| p.as_str()).unwrap_or("-"),
            action = %entry.action,
            outcome = %entry.outcome,
            "audit"
        );

        if let Err(e) = self.db.insert_audit(&entry).await {
            warn!("Failed to persist audit entry for {}: {}", entry.action, e);
        }
    }
}

/// Replace values under sensitive keys with a fingerprint, recursively
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    if is_sensitive_key(&key) {
                        let fingerprinted = match &v {
                            Value::String(s) => Value::String(fingerprint(s)),
                            Value::Null => Value::Null,
                            other => Value::String(fingerprint(&other.to_string())),
                        };
                        (key, fingerprinted)
                    } else {
                        (key, sanitize(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// `sha256:` followed by the first 8 bytes of the digest in hex
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}
