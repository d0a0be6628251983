//! Insight cache and refresh engine
//!
//! Reads are served from the `insight_snapshots` table. A snapshot older than
//! [`INSIGHT_TTL_SECS`] (or a forced read) triggers a live fetch through the
//! post's adapter; when that fetch fails or is degraded, the last known
//! snapshot is served instead, or a zeroed one if nothing was ever cached.
//! Snapshots of deleted posts are final and never fetched again; they keep
//! the last metrics seen before the deletion.
//!
//! Live fetches for the same post are serialized. A non-forced reader that
//! waited on another reader's fetch serves that result instead of calling the
//! platform a second time; a forced reader always fetches itself.
//!
//! The credential used for a live fetch belongs to the owner who published
//! the post here. Posts published elsewhere can be read through
//! [`InsightCache::get_owner_insights`], which names the owner explicitly.

use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::clock::Clock;
use super::refresh::TokenRefreshCoordinator;
use crate::audit::{AuditAction, AuditLog};
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PlatformError, Result};
use crate::platforms::AdapterRegistry;
use crate::types::{InsightMetrics, InsightSnapshot, Platform};

/// Maximum age of a cached snapshot before the next read refreshes it
pub const INSIGHT_TTL_SECS: i64 = 3_600;

/// A snapshot is stale once strictly more than the TTL has passed
pub fn is_stale(snapshot: &InsightSnapshot, now: i64) -> bool {
    now - snapshot.last_updated_at > INSIGHT_TTL_SECS
}

type FetchLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Held while a live fetch for one post is in progress
struct FetchSlot {
    locks: FetchLocks,
    post_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FetchSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if locks
            .get(&self.post_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.post_id);
        }
    }
}

#[derive(Clone)]
pub struct InsightCache {
    db: Database,
    registry: AdapterRegistry,
    credentials: CredentialStore,
    refresher: TokenRefreshCoordinator,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    locks: FetchLocks,
}

impl InsightCache {
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
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Metrics for one post, refreshed from the platform when stale
    ///
    /// # Errors
    ///
    /// Only storage failures. Platform failures fall back to the cached or a
    /// zeroed snapshot.
    pub async fn get_insights(
        &self,
        platform_post_id: &str,
        platform: Platform,
        force_refresh: bool,
    ) -> Result<InsightSnapshot> {
        self.read(platform_post_id, platform, None, force_refresh).await
    }

    /// Like [`get_insights`](Self::get_insights), for a post that may not
    /// have been published through this service
    ///
    /// A local publish record still takes precedence; `owner_id` is only
    /// used to find the credential when there is none.
    pub async fn get_owner_insights(
        &self,
        owner_id: &str,
        platform_post_id: &str,
        platform: Platform,
        force_refresh: bool,
    ) -> Result<InsightSnapshot> {
        self.read(platform_post_id, platform, Some(owner_id), force_refresh)
            .await
    }

    async fn read(
        &self,
        platform_post_id: &str,
        platform: Platform,
        owner_id: Option<&str>,
        force_refresh: bool,
    ) -> Result<InsightSnapshot> {
        let cached = self.db.get_snapshot(platform_post_id).await?;
        if let Some(snapshot) = &cached {
            if snapshot.is_deleted {
                debug!(post_id = %platform_post_id, "Post deleted, serving final snapshot");
                return Ok(snapshot.clone());
            }
            if !force_refresh && !is_stale(snapshot, self.clock.now()) {
                return Ok(snapshot.clone());
            }
        }

        let _slot = self.acquire(platform_post_id).await;

        // Another reader may have refreshed while this one waited
        let current = self.db.get_snapshot(platform_post_id).await?;
        if let Some(snapshot) = &current {
            let refreshed_meanwhile = cached
                .as_ref()
                .map_or(true, |c| snapshot.last_updated_at > c.last_updated_at);
            if snapshot.is_deleted || (refreshed_meanwhile && !force_refresh) {
                return Ok(snapshot.clone());
            }
        }

        let now = self.clock.now();
        let failure = match self.fetch_live(platform_post_id, platform, owner_id).await {
            Ok(metrics) if !metrics.degraded => {
                let snapshot = match &current {
                    Some(last) if metrics.is_deleted => last.clone().into_deleted(now),
                    _ => InsightSnapshot::from_metrics(platform_post_id, platform, &metrics, now),
                };
                self.db.upsert_snapshot(&snapshot).await?;
                if metrics.is_deleted {
                    self.audit
                        .record(
                            None,
                            Some(platform),
                            AuditAction::InsightFetch,
                            "deleted",
                            Some(json!({ "platform_post_id": platform_post_id })),
                        )
                        .await;
                }
                return Ok(self
                    .db
                    .get_snapshot(platform_post_id)
                    .await?
                    .unwrap_or(snapshot));
            }
            Ok(_) => ("degraded", "platform denied or throttled the request".to_string()),
            Err(e) => ("failed", e.to_string()),
        };

        let (outcome, error) = failure;
        warn!(
            post_id = %platform_post_id,
            platform = %platform,
            error = %error,
            "Live insight fetch unavailable, serving last known metrics"
        );
        self.audit
            .record(
                None,
                Some(platform),
                AuditAction::InsightFetch,
                outcome,
                Some(json!({ "platform_post_id": platform_post_id, "error": error })),
            )
            .await;

        Ok(current.unwrap_or_else(|| InsightSnapshot::zeroed(platform_post_id, platform, now)))
    }

    /// Metrics for many posts; a failing post never fails the batch
    pub async fn get_insights_batch(
        &self,
        posts: &[(String, Platform)],
        force_refresh: bool,
    ) -> Vec<InsightSnapshot> {
        let tasks = posts.iter().map(|(post_id, platform)| async move {
            match self.get_insights(post_id, *platform, force_refresh).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(post_id = %post_id, platform = %platform, error = %e, "Insight read failed");
                    InsightSnapshot::zeroed(post_id, *platform, self.clock.now())
                }
            }
        });
        join_all(tasks).await
    }

    async fn acquire(&self, platform_post_id: &str) -> FetchSlot {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(platform_post_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        FetchSlot {
            locks: self.locks.clone(),
            post_id: platform_post_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Fetch through the credential of the owner who published the post,
    /// falling back to `owner_id` for posts with no publish record
    async fn fetch_live(
        &self,
        platform_post_id: &str,
        platform: Platform,
        owner_id: Option<&str>,
    ) -> Result<InsightMetrics> {
        let owner = match self.db.find_published(platform, platform_post_id).await? {
            Some(transaction) => transaction.owner_id,
            None => owner_id.map(str::to_string).ok_or_else(|| {
                PlatformError::Authentication(format!(
                    "No publish record links {} post {} to a connected account",
                    platform, platform_post_id
                ))
            })?,
        };

        let credential = self
            .credentials
            .load(&owner, platform)
            .await?
            .ok_or_else(|| {
                PlatformError::Authentication(format!(
                    "{} is no longer connected for owner {}",
                    platform, owner
                ))
            })?;

        let adapter = self.registry.require(platform)?;
        let (credential, _) = self.refresher.ensure_fresh(credential).await;
        adapter.fetch_insights(&credential, platform_post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;
    use crate::service::test_support::{test_env, TestEnv, T0};
    use std::time::Duration;

    fn cache(env: &TestEnv, registry: AdapterRegistry) -> InsightCache {
        let clock: Arc<dyn Clock> = Arc::new(env.clock.clone());
        let refresher = TokenRefreshCoordinator::new(
            env.config.clone(),
            registry.clone(),
            env.credentials.clone(),
            env.audit.clone(),
            clock.clone(),
        );
        InsightCache::new(
            env.db.clone(),
            registry,
            env.credentials.clone(),
            refresher,
            env.audit.clone(),
            clock,
        )
    }

    #[test]
    fn test_staleness_boundary() {
        let snapshot = InsightSnapshot::zeroed("p", Platform::Facebook, T0);
        assert!(!is_stale(&snapshot, T0 + INSIGHT_TTL_SECS));
        assert!(is_stale(&snapshot, T0 + INSIGHT_TTL_SECS + 1));
    }

    #[tokio::test]
    async fn test_first_read_creates_snapshot() {
        let env = test_env().await;
        env.connect("1", &[Platform::YouTube]).await;
        env.published("1", Platform::YouTube, "post-1").await;
        let youtube = MockAdapter::new(Platform::YouTube).with_insights(InsightMetrics::new(10, 2, 100, 100));
        let cache = cache(&env, AdapterRegistry::new().with(youtube.clone()));

        let snapshot = cache.get_insights("post-1", Platform::YouTube, false).await.unwrap();

        assert_eq!(snapshot.likes, 10);
        assert_eq!(snapshot.engagement_rate, 12.0);
        assert_eq!(snapshot.last_updated_at, T0);
        assert!(!snapshot.is_deleted);
        assert_eq!(env.db.get_snapshot("post-1").await.unwrap(), Some(snapshot));
        assert_eq!(youtube.insight_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_window_serves_cache_then_refreshes() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook]).await;
        env.published("1", Platform::Facebook, "page_1").await;
        let facebook = MockAdapter::new(Platform::Facebook).with_insights(InsightMetrics::new(1, 0, 10, 10));
        let cache = cache(&env, AdapterRegistry::new().with(facebook.clone()));

        cache.get_insights("page_1", Platform::Facebook, false).await.unwrap();
        facebook.set_insights(InsightMetrics::new(5, 0, 10, 10));

        env.clock.set(T0 + INSIGHT_TTL_SECS);
        let cached = cache.get_insights("page_1", Platform::Facebook, false).await.unwrap();
        assert_eq!(cached.likes, 1);
        assert_eq!(facebook.insight_fetch_count(), 1);

        env.clock.set(T0 + INSIGHT_TTL_SECS + 1);
        let refreshed = cache.get_insights("page_1", Platform::Facebook, false).await.unwrap();
        assert_eq!(refreshed.likes, 5);
        assert_eq!(refreshed.last_updated_at, T0 + INSIGHT_TTL_SECS + 1);
        assert_eq!(facebook.insight_fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_ttl() {
        let env = test_env().await;
        env.connect("1", &[Platform::LinkedIn]).await;
        env.published("1", Platform::LinkedIn, "urn:li:share:1").await;
        let linkedin = MockAdapter::new(Platform::LinkedIn);
        let cache = cache(&env, AdapterRegistry::new().with(linkedin.clone()));

        cache.get_insights("urn:li:share:1", Platform::LinkedIn, false).await.unwrap();
        cache.get_insights("urn:li:share:1", Platform::LinkedIn, true).await.unwrap();
        assert_eq!(linkedin.insight_fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_serves_previous_snapshot() {
        let env = test_env().await;
        env.connect("1", &[Platform::Instagram]).await;
        env.published("1", Platform::Instagram, "ig-1").await;
        let instagram = MockAdapter::new(Platform::Instagram).with_insights(InsightMetrics::new(7, 3, 50, 80));
        let cache = cache(&env, AdapterRegistry::new().with(instagram.clone()));

        let first = cache.get_insights("ig-1", Platform::Instagram, false).await.unwrap();
        instagram.set_insight_error(PlatformError::Network("graph returned 503".to_string()));
        env.clock.advance(INSIGHT_TTL_SECS + 1);

        let served = cache.get_insights("ig-1", Platform::Instagram, false).await.unwrap();
        assert_eq!(served, first);
        assert_eq!(instagram.insight_fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_degraded_result_does_not_overwrite_cache() {
        let env = test_env().await;
        env.connect("1", &[Platform::Instagram]).await;
        env.published("1", Platform::Instagram, "ig-2").await;
        let instagram = MockAdapter::new(Platform::Instagram).with_insights(InsightMetrics::new(4, 1, 20, 20));
        let cache = cache(&env, AdapterRegistry::new().with(instagram.clone()));

        cache.get_insights("ig-2", Platform::Instagram, false).await.unwrap();
        instagram.set_insights(InsightMetrics::degraded());
        let served = cache.get_insights("ig-2", Platform::Instagram, true).await.unwrap();

        assert_eq!(served.likes, 4);
        assert_eq!(env.db.get_snapshot("ig-2").await.unwrap().unwrap().likes, 4);
    }

    #[tokio::test]
    async fn test_unknown_post_gets_unpersisted_zeroed_snapshot() {
        let env = test_env().await;
        let pinterest = MockAdapter::new(Platform::Pinterest);
        let cache = cache(&env, AdapterRegistry::new().with(pinterest.clone()));

        let snapshot = cache.get_insights("pin-9", Platform::Pinterest, false).await.unwrap();
        assert_eq!(snapshot, InsightSnapshot::zeroed("pin-9", Platform::Pinterest, T0));
        assert!(env.db.get_snapshot("pin-9").await.unwrap().is_none());
        assert_eq!(pinterest.insight_fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_post_is_never_fetched_again() {
        let env = test_env().await;
        env.connect("1", &[Platform::YouTube]).await;
        env.published("1", Platform::YouTube, "gone").await;
        let youtube = MockAdapter::new(Platform::YouTube).with_insights(InsightMetrics::deleted());
        let cache = cache(&env, AdapterRegistry::new().with(youtube.clone()));

        assert!(cache.get_insights("gone", Platform::YouTube, false).await.unwrap().is_deleted);
        env.clock.advance(10 * INSIGHT_TTL_SECS);
        assert!(cache.get_insights("gone", Platform::YouTube, true).await.unwrap().is_deleted);
        assert_eq!(youtube.insight_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_deletion_keeps_last_known_metrics() {
        let env = test_env().await;
        env.connect("1", &[Platform::YouTube]).await;
        env.published("1", Platform::YouTube, "vid").await;
        let youtube = MockAdapter::new(Platform::YouTube).with_insights(InsightMetrics::new(500, 40, 1000, 1000));
        let cache = cache(&env, AdapterRegistry::new().with(youtube.clone()));

        let before = cache.get_insights("vid", Platform::YouTube, false).await.unwrap();
        youtube.set_insights(InsightMetrics::deleted());
        env.clock.advance(60);
        let after = cache.get_insights("vid", Platform::YouTube, true).await.unwrap();

        assert!(after.is_deleted);
        assert_eq!(after.last_updated_at, T0 + 60);
        assert_eq!(
            (after.likes, after.comments, after.reach, after.impressions),
            (500, 40, 1000, 1000)
        );
        assert_eq!(after.engagement_rate, before.engagement_rate);
        assert_eq!(env.db.get_snapshot("vid").await.unwrap(), Some(after));
    }

    #[tokio::test]
    async fn test_owner_insights_without_publish_record() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook]).await;
        let facebook = MockAdapter::new(Platform::Facebook).with_insights(InsightMetrics::new(8, 2, 40, 40));
        let cache = cache(&env, AdapterRegistry::new().with(facebook.clone()));

        let anonymous = cache.get_insights("external", Platform::Facebook, false).await.unwrap();
        assert_eq!(anonymous.likes, 0);
        assert_eq!(facebook.insight_fetch_count(), 0);

        let owned = cache
            .get_owner_insights("1", "external", Platform::Facebook, false)
            .await
            .unwrap();
        assert_eq!(owned.likes, 8);
        assert_eq!(facebook.insight_fetch_count(), 1);

        // Another owner without a credential falls back to the cache
        env.clock.advance(INSIGHT_TTL_SECS + 1);
        let other = cache
            .get_owner_insights("2", "external", Platform::Facebook, false)
            .await
            .unwrap();
        assert_eq!(other, owned);
        assert_eq!(facebook.insight_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook, Platform::LinkedIn]).await;
        env.published("1", Platform::Facebook, "fb-1").await;
        env.published("1", Platform::LinkedIn, "li-1").await;
        let linkedin = MockAdapter::new(Platform::LinkedIn);
        linkedin.set_insight_error(PlatformError::Network("timeout".to_string()));
        let registry = AdapterRegistry::new()
            .with(MockAdapter::new(Platform::Facebook).with_insights(InsightMetrics::new(3, 0, 30, 30)))
            .with(linkedin);
        let cache = cache(&env, registry);

        let snapshots = cache
            .get_insights_batch(
                &[
                    ("fb-1".to_string(), Platform::Facebook),
                    ("li-1".to_string(), Platform::LinkedIn),
                ],
                false,
            )
            .await;

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].likes, 3);
        assert_eq!(snapshots[1], InsightSnapshot::zeroed("li-1", Platform::LinkedIn, T0));
    }

    #[tokio::test]
    async fn test_concurrent_stale_reads_fetch_once() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook]).await;
        env.published("1", Platform::Facebook, "hot").await;
        let facebook = MockAdapter::new(Platform::Facebook)
            .with_insights(InsightMetrics::new(2, 0, 4, 4))
            .with_delay(Duration::from_millis(20));
        let cache = cache(&env, AdapterRegistry::new().with(facebook.clone()));

        let (a, b) = tokio::join!(
            cache.get_insights("hot", Platform::Facebook, false),
            cache.get_insights("hot", Platform::Facebook, false)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(facebook.insight_fetch_count(), 1);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_forced_reads_each_fetch() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook]).await;
        env.published("1", Platform::Facebook, "hot").await;
        let facebook = MockAdapter::new(Platform::Facebook)
            .with_insights(InsightMetrics::new(2, 0, 4, 4))
            .with_delay(Duration::from_millis(20));
        let cache = cache(&env, AdapterRegistry::new().with(facebook.clone()));

        let (a, b) = tokio::join!(
            cache.get_insights("hot", Platform::Facebook, true),
            cache.get_insights("hot", Platform::Facebook, true)
        );

        assert_eq!(a.unwrap().likes, 2);
        assert_eq!(b.unwrap().likes, 2);
        assert_eq!(facebook.insight_fetch_count(), 2);
        assert!(cache.locks.lock().unwrap().is_empty());
    }
}
