//! Fixtures shared by the service unit tests

use std::sync::Arc;
use tempfile::TempDir;

use super::clock::ManualClock;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::types::{AccountIdentity, OwnerProfile, Platform, PlatformCredential, PublishTransaction};

pub(crate) const T0: i64 = 1_700_000_000;

pub(crate) struct TestEnv {
    pub db: Database,
    pub config: Arc<Config>,
    pub clock: ManualClock,
    pub audit: AuditLog,
    pub credentials: CredentialStore,
    _temp_dir: TempDir,
}

pub(crate) fn test_config() -> Config {
    let mut toml = String::from(
        r#"
[database]
path = "unused.db"

[app]
base_url = "https://app.example.com"
"#,
    );
    for platform in Platform::ALL {
        toml.push_str(&format!(
            "\n[oauth.{key}]\nclient_id = \"{key}-id\"\nclient_secret = \"{key}-secret\"\nredirect_uri = \"https://app.example.com/oauth/callback\"\n",
            key = platform.config_key()
        ));
    }
    Config::from_toml(&toml).unwrap()
}

pub(crate) async fn test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("service.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    TestEnv {
        config: Arc::new(test_config()),
        clock: ManualClock::new(T0),
        audit: AuditLog::new(db.clone()),
        credentials: CredentialStore::new(db.clone()),
        db,
        _temp_dir: temp_dir,
    }
}

pub(crate) fn owner(id: &str) -> OwnerProfile {
    OwnerProfile {
        id: id.to_string(),
        primary_email: Some(format!("{}@example.com", id)),
        given_name: None,
        family_name: None,
    }
}

pub(crate) fn credential(owner_id: &str, platform: Platform) -> PlatformCredential {
    let key = platform.config_key();
    PlatformCredential {
        owner_id: owner_id.to_string(),
        platform,
        access_token: format!("{}-access", key),
        refresh_token: Some(format!("{}-refresh", key)),
        account: AccountIdentity::Resolved(format!("{}-account", key)),
        page_access_token: None,
        display_name: Some(format!("Stored {}", platform)),
        issued_at: T0,
        expires_in_seconds: Some(3_600),
    }
}

impl TestEnv {
    /// Create the owner and store a credential for each platform
    pub async fn connect(&self, owner_id: &str, platforms: &[Platform]) {
        self.db.create_owner(&owner(owner_id), T0).await.unwrap();
        for platform in platforms {
            self.credentials
                .save(&credential(owner_id, *platform))
                .await
                .unwrap();
        }
    }

    /// Record a successful publish so insight fetches can find the owner
    pub async fn published(&self, owner_id: &str, platform: Platform, post_id: &str) {
        self.db
            .create_publish_transaction(&PublishTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                owner_id: owner_id.to_string(),
                platform,
                platform_post_id: Some(post_id.to_string()),
                published: true,
                media_refs: Vec::new(),
                error_message: None,
                created_at: T0,
            })
            .await
            .unwrap();
    }
}
