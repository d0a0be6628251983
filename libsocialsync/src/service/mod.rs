//! Service layer for SocialSync
//!
//! `SocialSyncService` is the single entry point used by the CLI (and any
//! other front end). It wires the shared resources (database, configuration,
//! adapter registry, clock) into the specialized sub-services:
//!
//! - `CallbackHandler`: OAuth connect and callback
//! - `TokenRefreshCoordinator`: opportunistic token refresh
//! - `PublishOrchestrator`: multi-platform publishing
//! - `InsightCache`: cached, TTL-refreshed engagement metrics
//! - `ConnectionStatusChecker`: per-platform connection status
//!
//! # Example
//!
//! ```no_run
//! use libsocialsync::service::SocialSyncService;
//! use libsocialsync::types::{Platform, PublishContent};
//!
//! # async fn example() -> libsocialsync::Result<()> {
//! let service = SocialSyncService::new().await?;
//!
//! let outcomes = service
//!     .publish("42", &[Platform::Facebook, Platform::LinkedIn], &PublishContent::text("Hello"))
//!     .await?;
//! println!("Published to {} platforms", outcomes.iter().filter(|o| o.success).count());
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod clock;
pub mod insights;
pub mod publishing;
pub mod refresh;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use callback::{CallbackError, Redirect};
pub use publishing::PublishOutcome;
pub use refresh::RefreshOutcome;

use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use self::callback::CallbackHandler;
use self::clock::{Clock, SystemClock};
use self::insights::InsightCache;
use self::publishing::PublishOrchestrator;
use self::refresh::TokenRefreshCoordinator;
use self::status::ConnectionStatusChecker;
use crate::audit::{AuditAction, AuditLog};
use crate::credentials::CredentialStore;
use crate::identity::{HttpIdentityProvider, IdentityProvider, StaticIdentityProvider};
use crate::platforms::{http, AdapterRegistry};
use crate::types::{ConnectionStatus, InsightSnapshot, Platform, PublishContent};
use crate::{Config, Database, Result};

/// Main service facade coordinating all sub-services
///
/// All sub-services share the same `Database` pool, `Arc<Config>`, adapter
/// registry and clock.
pub struct SocialSyncService {
    db: Database,
    config: Arc<Config>,
    credentials: CredentialStore,
    audit: AuditLog,
    callbacks: CallbackHandler,
    refresher: TokenRefreshCoordinator,
    publisher: PublishOrchestrator,
    insights: InsightCache,
    status: ConnectionStatusChecker,
}

impl SocialSyncService {
    /// Create a service from the configuration at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration cannot be loaded
    /// - Database cannot be opened or migrated
    /// - The HTTP client cannot be built
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service with a pre-built configuration and the production
    /// adapters
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let registry = AdapterRegistry::from_config(&config)?;

        let identity: Arc<dyn IdentityProvider> = match &config.identity {
            Some(identity) => Arc::new(HttpIdentityProvider::new(
                http::build_client(config.http.timeout())?,
                identity,
            )),
            None => {
                warn!("No identity provider configured; callbacks only succeed for existing owners");
                Arc::new(StaticIdentityProvider::new())
            }
        };

        Ok(Self::from_parts(config, db, registry, identity, Arc::new(SystemClock)))
    }

    /// Assemble a service from explicit parts
    pub fn from_parts(
        config: Config,
        db: Database,
        registry: AdapterRegistry,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let credentials = CredentialStore::new(db.clone());
        let audit = AuditLog::new(db.clone());

        let refresher = TokenRefreshCoordinator::new(
            Arc::clone(&config),
            registry.clone(),
            credentials.clone(),
            audit.clone(),
            Arc::clone(&clock),
        );
        let callbacks = CallbackHandler::new(
            Arc::clone(&config),
            registry.clone(),
            db.clone(),
            credentials.clone(),
            identity,
            audit.clone(),
            Arc::clone(&clock),
        );
        let publisher = PublishOrchestrator::new(
            db.clone(),
            registry.clone(),
            credentials.clone(),
            refresher.clone(),
            audit.clone(),
            Arc::clone(&clock),
        );
        let insights = InsightCache::new(
            db.clone(),
            registry.clone(),
            credentials.clone(),
            refresher.clone(),
            audit.clone(),
            clock,
        );
        let status =
            ConnectionStatusChecker::new(registry, credentials.clone(), config.http.status_timeout());

        Self {
            db,
            config,
            credentials,
            audit,
            callbacks,
            refresher,
            publisher,
            insights,
            status,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn callbacks(&self) -> &CallbackHandler {
        &self.callbacks
    }

    pub fn refresher(&self) -> &TokenRefreshCoordinator {
        &self.refresher
    }

    pub fn publisher(&self) -> &PublishOrchestrator {
        &self.publisher
    }

    pub fn insights(&self) -> &InsightCache {
        &self.insights
    }

    /// Authorization URL for connecting `platform`
    pub async fn connect(&self, platform: Platform, owner_id: &str) -> Result<Url> {
        self.callbacks.connect(platform, owner_id).await
    }

    /// Complete an OAuth redirect; always yields a redirect
    pub async fn handle_callback(&self, code: Option<&str>, state: Option<&str>) -> Redirect {
        self.callbacks.handle(code, state).await
    }

    pub async fn publish(
        &self,
        owner_id: &str,
        platforms: &[Platform],
        content: &PublishContent,
    ) -> Result<Vec<PublishOutcome>> {
        self.publisher.publish(owner_id, platforms, content).await
    }

    pub async fn get_insights(
        &self,
        platform_post_id: &str,
        platform: Platform,
        force_refresh: bool,
    ) -> Result<InsightSnapshot> {
        self.insights
            .get_insights(platform_post_id, platform, force_refresh)
            .await
    }

    /// Insights for a post that may have been published outside this service,
    /// read with `owner_id`'s credential when no publish record exists
    pub async fn get_owner_insights(
        &self,
        owner_id: &str,
        platform_post_id: &str,
        platform: Platform,
        force_refresh: bool,
    ) -> Result<InsightSnapshot> {
        self.insights
            .get_owner_insights(owner_id, platform_post_id, platform, force_refresh)
            .await
    }

    pub async fn get_insights_batch(
        &self,
        posts: &[(String, Platform)],
        force_refresh: bool,
    ) -> Vec<InsightSnapshot> {
        self.insights.get_insights_batch(posts, force_refresh).await
    }

    pub async fn get_connection_status(&self, owner_id: &str) -> Result<Vec<ConnectionStatus>> {
        self.status.check(owner_id).await
    }

    /// Refresh the owner's refreshable tokens; `force` ignores the expiry window
    pub async fn refresh_owner_tokens(
        &self,
        owner_id: &str,
        force: bool,
    ) -> Result<Vec<(Platform, RefreshOutcome)>> {
        self.refresher.refresh_owner(owner_id, force).await
    }

    /// Remove a stored credential. Returns false when nothing was connected.
    pub async fn disconnect(&self, owner_id: &str, platform: Platform) -> Result<bool> {
        let removed = self.credentials.disconnect(owner_id, platform).await?;
        self.audit
            .record(
                Some(owner_id),
                Some(platform),
                AuditAction::Disconnect,
                if removed { "removed" } else { "not_connected" },
                Some(json!({ "removed": removed })),
            )
            .await;
        Ok(removed)
    }
}
