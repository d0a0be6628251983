//! Token refresh coordinator
//!
//! Refresh is opportunistic: it runs right before a credential is used (a
//! publish or a live insight fetch) or when asked for explicitly, never on a
//! timer. A failed refresh leaves the stored tokens untouched, so the next
//! use surfaces an explicit reconnect condition instead of retrying in a loop.

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::Clock;
use crate::audit::{AuditAction, AuditLog};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::platforms::AdapterRegistry;
use crate::types::{Platform, PlatformCredential};

/// Tokens expiring within this many seconds are refreshed before use
pub const REFRESH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Token is not close to expiry
    NotNeeded,
    /// Platform grants no refresh tokens
    NotSupported,
    MissingRefreshToken,
    Refreshed,
    Failed(String),
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::NotNeeded => f.write_str("not needed"),
            RefreshOutcome::NotSupported => f.write_str("not supported"),
            RefreshOutcome::MissingRefreshToken => f.write_str("no refresh token stored"),
            RefreshOutcome::Refreshed => f.write_str("refreshed"),
            RefreshOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    config: Arc<Config>,
    registry: AdapterRegistry,
    credentials: CredentialStore,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        config: Arc<Config>,
        registry: AdapterRegistry,
        credentials: CredentialStore,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            credentials,
            audit,
            clock,
        }
    }

    /// Refresh the credential if it expires within [`REFRESH_WINDOW_SECS`].
    ///
    /// Returns the credential to use next: the refreshed one on success,
    /// otherwise the input unchanged.
    pub async fn ensure_fresh(
        &self,
        credential: PlatformCredential,
    ) -> (PlatformCredential, RefreshOutcome) {
        self.refresh(credential, false).await
    }

    /// Refresh regardless of the expiry window (where the platform allows it)
    pub async fn force_refresh(
        &self,
        credential: PlatformCredential,
    ) -> (PlatformCredential, RefreshOutcome) {
        self.refresh(credential, true).await
    }

    /// Refresh every refreshable credential of an owner
    pub async fn refresh_owner(
        &self,
        owner_id: &str,
        force: bool,
    ) -> Result<Vec<(Platform, RefreshOutcome)>> {
        let credentials = self.credentials.list(owner_id).await?;
        let tasks = credentials.into_iter().map(|credential| async move {
            let platform = credential.platform;
            let (_, outcome) = self.refresh(credential, force).await;
            (platform, outcome)
        });
        Ok(join_all(tasks).await)
    }

    async fn refresh(
        &self,
        credential: PlatformCredential,
        force: bool,
    ) -> (PlatformCredential, RefreshOutcome) {
        let platform = credential.platform;
        let owner_id = credential.owner_id.clone();
        let now = self.clock.now();

        let Some(adapter) = self.registry.get(platform) else {
            return (credential, RefreshOutcome::NotSupported);
        };
        if !adapter.supports_refresh() {
            return (credential, RefreshOutcome::NotSupported);
        }
        if !force && !credential.expires_within(now, REFRESH_WINDOW_SECS) {
            return (credential, RefreshOutcome::NotNeeded);
        }
        let Some(refresh_token) = credential.refresh_token.clone() else {
            warn!(owner_id = %owner_id, platform = %platform, "Token expiring but no refresh token stored");
            return (credential, RefreshOutcome::MissingRefreshToken);
        };

        let settings = match self.config.oauth_settings(platform) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(owner_id = %owner_id, platform = %platform, error = %e, "Cannot refresh token");
                return (credential, RefreshOutcome::Failed(e.to_string()));
            }
        };

        debug!(owner_id = %owner_id, platform = %platform, "Refreshing access token");
        let grant = match adapter.refresh(&settings, &refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(
                    owner_id = %owner_id,
                    platform = %platform,
                    error = %e,
                    "Token refresh failed, keeping existing token"
                );
                self.audit
                    .record(
                        Some(&owner_id),
                        Some(platform),
                        AuditAction::Refresh,
                        "failed",
                        Some(json!({ "error": e.to_string() })),
                    )
                    .await;
                return (credential, RefreshOutcome::Failed(e.to_string()));
            }
        };

        match self.credentials.rotate(&owner_id, platform, &grant, now).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(owner_id = %owner_id, platform = %platform, "Credential disconnected during refresh");
                return (
                    credential,
                    RefreshOutcome::Failed("credential no longer exists".to_string()),
                );
            }
            Err(e) => {
                warn!(owner_id = %owner_id, platform = %platform, error = %e, "Could not store refreshed token");
                return (credential, RefreshOutcome::Failed(e.to_string()));
            }
        }

        info!(owner_id = %owner_id, platform = %platform, "Access token refreshed");
        self.audit
            .record(
                Some(&owner_id),
                Some(platform),
                AuditAction::Refresh,
                "refreshed",
                Some(json!({ "rotated_refresh_token": grant.refresh_token.is_some() })),
            )
            .await;

        let refreshed = PlatformCredential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(credential.refresh_token.clone()),
            issued_at: now,
            expires_in_seconds: grant.expires_in_seconds,
            ..credential
        };
        (refreshed, RefreshOutcome::Refreshed)
    }
}
