//! Publish orchestrator
//!
//! Fans one logical post out to every requested platform. Platforms run
//! concurrently and independently: a failure on one never blocks or rolls
//! back another, and every attempt leaves exactly one publish transaction.

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::clock::Clock;
use super::refresh::TokenRefreshCoordinator;
use crate::audit::{AuditAction, AuditLog};
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PlatformError, Result, SocialSyncError};
use crate::platforms::AdapterRegistry;
use crate::types::{Platform, PublishContent, PublishTransaction};

/// Result of publishing to one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub platform: Platform,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub error: Option<String>,
}

impl PublishOutcome {
    fn published(platform: Platform, post_id: String) -> Self {
        Self {
            platform,
            success: true,
            platform_post_id: Some(post_id),
            error: None,
        }
    }

    fn failed(platform: Platform, error: &SocialSyncError) -> Self {
        Self {
            platform,
            success: false,
            platform_post_id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PublishOrchestrator {
    db: Database,
    registry: AdapterRegistry,
    credentials: CredentialStore,
    refresher: TokenRefreshCoordinator,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl PublishOrchestrator {
    pub fn new(
        db: Database,
        registry: AdapterRegistry,
        credentials: CredentialStore,
        refresher: TokenRefreshCoordinator,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            registry,
            credentials,
            refresher,
            audit,
            clock,
        }
    }

    /// Publish `content` for `owner_id` on each platform.
    ///
    /// Returns one outcome per distinct platform, in request order. Partial
    /// success is a normal result, not an error.
    ///
    /// # Errors
    ///
    /// Only `SocialSyncError::InvalidInput` when no platform was requested.
    pub async fn publish(
        &self,
        owner_id: &str,
        platforms: &[Platform],
        content: &PublishContent,
    ) -> Result<Vec<PublishOutcome>> {
        let mut targets: Vec<Platform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if !targets.contains(platform) {
                targets.push(*platform);
            }
        }
        if targets.is_empty() {
            return Err(SocialSyncError::InvalidInput(
                "At least one platform is required".to_string(),
            ));
        }

        let tasks = targets
            .iter()
            .map(|platform| self.publish_one(owner_id, *platform, content));
        let outcomes = join_all(tasks).await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            owner_id = %owner_id,
            "Published to {}/{} platforms",
            succeeded,
            outcomes.len()
        );
        Ok(outcomes)
    }

    async fn publish_one(
        &self,
        owner_id: &str,
        platform: Platform,
        content: &PublishContent,
    ) -> PublishOutcome {
        let result = self.attempt(owner_id, platform, content).await;
        self.record(owner_id, platform, content, &result).await;

        match result {
            Ok(post_id) => PublishOutcome::published(platform, post_id),
            Err(e) => {
                warn!(owner_id = %owner_id, platform = %platform, error = %e, "Publish failed");
                PublishOutcome::failed(platform, &e)
            }
        }
    }

    async fn attempt(
        &self,
        owner_id: &str,
        platform: Platform,
        content: &PublishContent,
    ) -> Result<String> {
        let adapter = self.registry.require(platform)?;
        let credential = self.credentials.load(owner_id, platform).await?.ok_or_else(|| {
            PlatformError::Authentication(format!("{} is not connected", platform))
        })?;

        let (credential, _) = self.refresher.ensure_fresh(credential).await;
        if credential.is_expired(self.clock.now()) {
            return Err(PlatformError::TokenExpired(format!(
                "{} access token expired, reconnect the account",
                platform
            ))
            .into());
        }

        adapter.publish(&credential, content).await
    }

    async fn record(
        &self,
        owner_id: &str,
        platform: Platform,
        content: &PublishContent,
        result: &Result<String>,
    ) {
        let transaction = PublishTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            platform,
            platform_post_id: result.as_ref().ok().cloned(),
            published: result.is_ok(),
            media_refs: content.media_refs(),
            error_message: result.as_ref().err().map(|e| e.to_string()),
            created_at: self.clock.now(),
        };

        if let Err(e) = self.db.create_publish_transaction(&transaction).await {
            warn!(platform = %platform, error = %e, "Failed to record publish transaction");
        }

        let (outcome, detail) = match result {
            Ok(post_id) => ("published", json!({ "platform_post_id": post_id })),
            Err(e) => ("failed", json!({ "error": e.to_string() })),
        };
        self.audit
            .record(Some(owner_id), Some(platform), AuditAction::Publish, outcome, Some(detail))
            .await;
    }
}
