//! Mock platform adapter for testing
//!
//! A configurable adapter that can simulate successes, failures and slow
//! responses for any platform without network access. All state is shared
//! behind `Arc`s, so a test can keep a clone of the adapter after handing
//! one to an [`AdapterRegistry`](super::AdapterRegistry) and inspect the
//! calls it received.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

use super::PlatformAdapter;
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{
    InsightMetrics, Platform, PlatformCredential, PublishContent, ResolvedIdentity, TokenGrant,
};

/// Scripted behavior of a mock adapter
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub grant: std::result::Result<TokenGrant, PlatformError>,
    pub identity: std::result::Result<ResolvedIdentity, PlatformError>,
    pub publish: std::result::Result<(), PlatformError>,
    pub insights: std::result::Result<InsightMetrics, PlatformError>,
    pub refresh: std::result::Result<TokenGrant, PlatformError>,
    pub display_name: std::result::Result<Option<String>, PlatformError>,
    /// Delay before publish, insight and display-name calls complete
    pub delay: Duration,
}

impl MockBehavior {
    fn for_platform(platform: Platform) -> Self {
        let refreshable = matches!(platform, Platform::YouTube | Platform::Pinterest);
        let key = platform.config_key();
        Self {
            grant: Ok(TokenGrant {
                access_token: format!("{}-access", key),
                refresh_token: refreshable.then(|| format!("{}-refresh", key)),
                expires_in_seconds: Some(3_600),
            }),
            identity: Ok(ResolvedIdentity::resolved(
                format!("{}-account", key),
                Some(format!("Mock {}", platform)),
            )),
            publish: Ok(()),
            insights: Ok(InsightMetrics::zeroed()),
            refresh: Ok(TokenGrant {
                access_token: format!("{}-access-refreshed", key),
                refresh_token: None,
                expires_in_seconds: Some(3_600),
            }),
            display_name: Ok(Some(format!("Mock {}", platform))),
            delay: Duration::ZERO,
        }
    }
}

/// Calls received by a mock adapter
#[derive(Debug, Default, Clone)]
pub struct MockCalls {
    pub exchanges: Vec<String>,
    pub resolves: usize,
    pub published: Vec<PublishContent>,
    pub insight_fetches: Vec<String>,
    pub refreshes: Vec<String>,
    pub display_name_lookups: usize,
}

/// Mock adapter for testing
#[derive(Clone)]
pub struct MockAdapter {
    platform: Platform,
    character_limit: Option<usize>,
    supports_refresh: bool,
    behavior: Arc<Mutex<MockBehavior>>,
    calls: Arc<Mutex<MockCalls>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    /// Mock that succeeds at everything and refreshes like the real platform
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            character_limit: None,
            supports_refresh: matches!(platform, Platform::YouTube | Platform::Pinterest),
            behavior: Arc::new(Mutex::new(MockBehavior::for_platform(platform))),
            calls: Arc::new(Mutex::new(MockCalls::default())),
        }
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.character_limit = Some(limit);
        self
    }

    pub fn with_refresh_support(mut self, supported: bool) -> Self {
        self.supports_refresh = supported;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.behavior).delay = delay;
        self
    }

    pub fn with_grant(self, grant: TokenGrant) -> Self {
        lock(&self.behavior).grant = Ok(grant);
        self
    }

    pub fn with_identity(self, identity: ResolvedIdentity) -> Self {
        lock(&self.behavior).identity = Ok(identity);
        self
    }

    pub fn failing_exchange(self, error: PlatformError) -> Self {
        lock(&self.behavior).grant = Err(error);
        self
    }

    pub fn failing_identity(self, error: PlatformError) -> Self {
        lock(&self.behavior).identity = Err(error);
        self
    }

    pub fn failing_publish(self, error: PlatformError) -> Self {
        lock(&self.behavior).publish = Err(error);
        self
    }

    pub fn with_insights(self, metrics: InsightMetrics) -> Self {
        self.set_insights(metrics);
        self
    }

    pub fn with_refresh_result(self, result: std::result::Result<TokenGrant, PlatformError>) -> Self {
        lock(&self.behavior).refresh = result;
        self
    }

    pub fn with_display_name(self, result: std::result::Result<Option<String>, PlatformError>) -> Self {
        lock(&self.behavior).display_name = result;
        self
    }

    /// Change the metrics returned by later insight fetches
    pub fn set_insights(&self, metrics: InsightMetrics) {
        lock(&self.behavior).insights = Ok(metrics);
    }

    /// Make later insight fetches fail
    pub fn set_insight_error(&self, error: PlatformError) {
        lock(&self.behavior).insights = Err(error);
    }

    /// Snapshot of every call received so far
    pub fn calls(&self) -> MockCalls {
        lock(&self.calls).clone()
    }

    pub fn publish_count(&self) -> usize {
        lock(&self.calls).published.len()
    }

    pub fn insight_fetch_count(&self) -> usize {
        lock(&self.calls).insight_fetches.len()
    }

    pub fn refresh_count(&self) -> usize {
        lock(&self.calls).refreshes.len()
    }

    fn behavior(&self) -> MockBehavior {
        lock(&self.behavior).clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url> {
        let mut url = Url::parse("https://auth.mock.invalid/authorize")
            .map_err(|e| PlatformError::Authentication(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("platform", self.platform.as_str())
            .append_pair("client_id", &settings.client_id)
            .append_pair("redirect_uri", &settings.redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, _settings: &OAuthSettings, code: &str) -> Result<TokenGrant> {
        lock(&self.calls).exchanges.push(code.to_string());
        Ok(self.behavior().grant?)
    }

    async fn resolve_identity(&self, _access_token: &str) -> Result<ResolvedIdentity> {
        lock(&self.calls).resolves += 1;
        Ok(self.behavior().identity?)
    }

    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String> {
        let behavior = self.behavior();
        let count = {
            let mut calls = lock(&self.calls);
            calls.published.push(content.clone());
            calls.published.len()
        };

        if !behavior.delay.is_zero() {
            sleep(behavior.delay).await;
        }

        self.validate_content(content)?;
        credential.account.require(self.platform)?;
        behavior.publish?;

        Ok(format!("{}-post-{}", self.platform.config_key(), count))
    }

    async fn fetch_insights(
        &self,
        _credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics> {
        let behavior = self.behavior();
        lock(&self.calls)
            .insight_fetches
            .push(platform_post_id.to_string());
        if !behavior.delay.is_zero() {
            sleep(behavior.delay).await;
        }
        Ok(behavior.insights?)
    }

    async fn display_name(&self, _credential: &PlatformCredential) -> Result<Option<String>> {
        let behavior = self.behavior();
        lock(&self.calls).display_name_lookups += 1;
        if !behavior.delay.is_zero() {
            sleep(behavior.delay).await;
        }
        Ok(behavior.display_name?)
    }

    fn supports_refresh(&self) -> bool {
        self.supports_refresh
    }

    async fn refresh(&self, _settings: &OAuthSettings, refresh_token: &str) -> Result<TokenGrant> {
        if !self.supports_refresh {
            return Err(PlatformError::NotSupported(format!(
                "{} does not grant refresh tokens",
                self.platform
            ))
            .into());
        }
        lock(&self.calls).refreshes.push(refresh_token.to_string());
        Ok(self.behavior().refresh?)
    }

    fn character_limit(&self) -> Option<usize> {
        self.character_limit
    }
}
