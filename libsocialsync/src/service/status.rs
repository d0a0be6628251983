//! Connection status for a settings page
//!
//! Each stored credential counts as connected. The account's display name is
//! looked up live with a short timeout; a slow or failing platform degrades
//! to "connected, details unavailable" instead of holding up the page.

use futures::future::join_all;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::platforms::AdapterRegistry;
use crate::types::{ConnectionStatus, Platform, PlatformCredential};

#[derive(Clone)]
pub struct ConnectionStatusChecker {
    registry: AdapterRegistry,
    credentials: CredentialStore,
    timeout: Duration,
}

impl ConnectionStatusChecker {
    pub fn new(registry: AdapterRegistry, credentials: CredentialStore, timeout: Duration) -> Self {
        Self {
            registry,
            credentials,
            timeout,
        }
    }

    /// Status of every supported platform for `owner_id`, in platform order
    pub async fn check(&self, owner_id: &str) -> Result<Vec<ConnectionStatus>> {
        let stored = self.credentials.list(owner_id).await?;

        let tasks = Platform::ALL.into_iter().map(|platform| {
            let credential = stored.iter().find(|c| c.platform == platform);
            async move {
                match credential {
                    Some(credential) => self.connected(credential).await,
                    None => ConnectionStatus {
                        platform,
                        connected: false,
                        display_name: None,
                    },
                }
            }
        });
        Ok(join_all(tasks).await)
    }

    async fn connected(&self, credential: &PlatformCredential) -> ConnectionStatus {
        let platform = credential.platform;
        let display_name = match self.registry.get(platform) {
            Some(adapter) => match timeout(self.timeout, adapter.display_name(credential)).await {
                Ok(Ok(name)) => name,
                Ok(Err(e)) => {
                    warn!(platform = %platform, error = %e, "Could not fetch account details");
                    None
                }
                Err(_) => {
                    debug!(platform = %platform, "Account details timed out after {:?}", self.timeout);
                    None
                }
            },
            None => None,
        };

        ConnectionStatus {
            platform,
            connected: true,
            display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platforms::mock::MockAdapter;
    use crate::service::test_support::test_env;

    #[tokio::test]
    async fn test_status_lists_every_platform() {
        let env = test_env().await;
        env.connect("1", &[Platform::Facebook, Platform::Pinterest]).await;
        let registry = AdapterRegistry::new()
            .with(MockAdapter::new(Platform::Facebook))
            .with(MockAdapter::new(Platform::Pinterest));
        let checker = ConnectionStatusChecker::new(registry, env.credentials.clone(), Duration::from_secs(2));

        let statuses = checker.check("1").await.unwrap();

        assert_eq!(statuses.len(), 5);
        assert_eq!(
            statuses[0],
            ConnectionStatus {
                platform: Platform::Facebook,
                connected: true,
                display_name: Some("Mock FACEBOOK".to_string()),
            }
        );
        assert!(!statuses[1].connected);
        assert!(statuses[4].connected);
    }

    #[tokio::test]
    async fn test_slow_platform_degrades_to_connected_without_details() {
        let env = test_env().await;
        env.connect("1", &[Platform::YouTube, Platform::LinkedIn]).await;
        let registry = AdapterRegistry::new()
            .with(MockAdapter::new(Platform::YouTube).with_delay(Duration::from_secs(5)))
            .with(MockAdapter::new(Platform::LinkedIn).with_display_name(Err(
                PlatformError::TokenExpired("401".to_string()),
            )));
        let checker =
            ConnectionStatusChecker::new(registry, env.credentials.clone(), Duration::from_millis(50));

        let statuses = checker.check("1").await.unwrap();
        let youtube = statuses.iter().find(|s| s.platform == Platform::YouTube).unwrap();
        let linkedin = statuses.iter().find(|s| s.platform == Platform::LinkedIn).unwrap();

        assert!(youtube.connected);
        assert_eq!(youtube.display_name, None);
        assert!(linkedin.connected);
        assert_eq!(linkedin.display_name, None);
    }
}
