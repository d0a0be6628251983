//! Platform adapters
//!
//! Every supported platform implements [`PlatformAdapter`], one concrete type
//! per platform. The rest of the crate only talks to this trait, so the
//! authorization handshake, account discovery, publish primitive and
//! reporting API of each platform stay inside its own module.
//!
//! # Examples
//!
//! ```no_run
//! use libsocialsync::config::Config;
//! use libsocialsync::platforms::AdapterRegistry;
//! use libsocialsync::types::Platform;
//!
//! # fn example() -> libsocialsync::error::Result<()> {
//! let config = Config::load()?;
//! let registry = AdapterRegistry::from_config(&config)?;
//! let settings = config.oauth_settings(Platform::LinkedIn)?;
//! let url = registry.require(Platform::LinkedIn)?.authorization_url(&settings, "LINKEDIN_42")?;
//! println!("Open {}", url);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::config::{Config, OAuthSettings};
use crate::error::{PlatformError, Result};
use crate::types::{
    InsightMetrics, Platform, PlatformCredential, PublishContent, ResolvedIdentity, TokenGrant,
};

pub mod facebook;
mod graph;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod pinterest;
pub mod youtube;

// Mock adapter is available for all builds to support integration tests
pub mod mock;

pub use graph::GraphEndpoints;

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Build the URL the owner is sent to in order to grant access
    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url>;

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// `PlatformError::InvalidGrant` when the platform rejected the code,
    /// `PlatformError::Network` when the token endpoint was unavailable.
    async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<TokenGrant>;

    /// Discover which platform account the token acts as.
    ///
    /// Missing business accounts are reported as an unresolved identity, not
    /// as an error, so the credential can still be stored.
    async fn resolve_identity(&self, access_token: &str) -> Result<ResolvedIdentity>;

    /// Publish content and return the platform's post id
    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String>;

    /// Fetch engagement metrics for a post.
    ///
    /// Permission and rate-limit failures come back as
    /// [`InsightMetrics::degraded`] instead of an error; a post the platform
    /// no longer knows comes back as [`InsightMetrics::deleted`].
    async fn fetch_insights(
        &self,
        credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics>;

    /// Name of the connected account, for connection status
    async fn display_name(&self, credential: &PlatformCredential) -> Result<Option<String>>;

    /// Whether the platform grants refresh tokens
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Trade a refresh token for a new access token
    async fn refresh(&self, _settings: &OAuthSettings, _refresh_token: &str) -> Result<TokenGrant> {
        Err(PlatformError::NotSupported(format!(
            "{} does not grant refresh tokens; reconnect when the token expires",
            self.platform()
        ))
        .into())
    }

    /// Maximum length of the post text, if limited
    fn character_limit(&self) -> Option<usize>;

    /// Check content against platform rules before any network call
    fn validate_content(&self, content: &PublishContent) -> Result<()> {
        if content.text.trim().is_empty() && content.media.is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.character_limit() {
            let count = content.text.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.platform(),
                    limit,
                    count
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Adapters keyed by platform
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the production adapters for every platform, sharing one HTTP client
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(config.http.timeout())?;

        Ok(Self::new()
            .with(facebook::FacebookAdapter::new(client.clone()))
            .with(instagram::InstagramAdapter::new(client.clone()))
            .with(
                linkedin::LinkedInAdapter::new(client.clone())
                    .with_max_media_bytes(config.http.max_media_bytes),
            )
            .with(
                youtube::YouTubeAdapter::new(client.clone())
                    .with_max_media_bytes(config.http.max_media_bytes),
            )
            .with(pinterest::PinterestAdapter::new(
                client,
                config.pinterest.default_board_id.clone(),
            )))
    }

    pub fn with<A: PlatformAdapter + 'static>(mut self, adapter: A) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    /// Register an adapter, replacing any adapter for the same platform
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn require(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.get(platform).ok_or_else(|| {
            PlatformError::NotSupported(format!("No adapter registered for {}", platform)).into()
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
