//! Shared setup for the service integration tests

#![allow(dead_code)]

use libsocialsync::config::Config;
use libsocialsync::identity::StaticIdentityProvider;
use libsocialsync::platforms::mock::MockAdapter;
use libsocialsync::platforms::AdapterRegistry;
use libsocialsync::service::clock::ManualClock;
use libsocialsync::types::OwnerProfile;
use libsocialsync::{Database, Platform, SocialSyncService};
use std::sync::Arc;
use tempfile::TempDir;

pub const T0: i64 = 1_760_000_000;

pub struct Harness {
    pub service: SocialSyncService,
    pub clock: ManualClock,
    pub identity: StaticIdentityProvider,
    _temp_dir: TempDir,
}

pub fn config() -> Config {
    let mut toml = String::from(
        r#"
[database]
path = "unused.db"

[app]
base_url = "https://app.example.com/"
"#,
    );
    for platform in Platform::ALL {
        toml.push_str(&format!(
            "\n[oauth.{key}]\nclient_id = \"{key}-client\"\nclient_secret = \"{key}-secret\"\nredirect_uri = \"https://app.example.com/oauth/callback\"\n",
            key = platform.config_key()
        ));
    }
    Config::from_toml(&toml).unwrap()
}

pub fn owner(id: &str) -> OwnerProfile {
    OwnerProfile {
        id: id.to_string(),
        primary_email: Some(format!("owner{}@example.com", id)),
        given_name: Some("Test".to_string()),
        family_name: Some("Owner".to_string()),
    }
}

/// Registry with a default mock for every platform
pub fn mock_registry() -> AdapterRegistry {
    Platform::ALL
        .into_iter()
        .fold(AdapterRegistry::new(), |registry, platform| {
            registry.with(MockAdapter::new(platform))
        })
}

pub async fn harness(registry: AdapterRegistry) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("socialsync.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    let clock = ManualClock::new(T0);
    let identity = StaticIdentityProvider::new().with_user(owner("42"));
    let service = SocialSyncService::from_parts(
        config(),
        db,
        registry,
        Arc::new(identity.clone()),
        Arc::new(clock.clone()),
    );

    Harness {
        service,
        clock,
        identity,
        _temp_dir: temp_dir,
    }
}

impl Harness {
    /// Run the OAuth callback for owner 42, asserting success
    pub async fn connect(&self, platform: Platform) {
        let state = format!("{}_42", platform.as_str());
        let redirect = self.service.handle_callback(Some("code"), Some(&state)).await;
        assert!(redirect.is_success(), "{} callback failed: {:?}", platform, redirect);
    }
}
