//! Credential store for connected platform accounts
//!
//! Holds at most one active credential per (owner, platform). Saving a
//! credential for a pair that already has one overwrites it; credentials are
//! only removed by an explicit disconnect.

use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::types::{Platform, PlatformCredential, TokenGrant};

#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
}

impl CredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a credential, replacing any existing one for the same pair
    pub async fn save(&self, credential: &PlatformCredential) -> Result<()> {
        debug!(
            owner_id = %credential.owner_id,
            platform = %credential.platform,
            resolved = credential.account.is_resolved(),
            "Saving credential"
        );
        self.db.upsert_credential(credential).await
    }

    pub async fn load(&self, owner_id: &str, platform: Platform) -> Result<Option<PlatformCredential>> {
        self.db.get_credential(owner_id, platform).await
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<PlatformCredential>> {
        self.db.list_credentials(owner_id).await
    }

    /// Apply a refreshed grant. Returns false if the credential vanished meanwhile.
    pub async fn rotate(
        &self,
        owner_id: &str,
        platform: Platform,
        grant: &TokenGrant,
        issued_at: i64,
    ) -> Result<bool> {
        debug!(
            owner_id,
            platform = %platform,
            rotated_refresh_token = grant.refresh_token.is_some(),
            "Rotating access token"
        );
        self.db
            .update_tokens(
                owner_id,
                platform,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                issued_at,
                grant.expires_in_seconds,
            )
            .await
    }

    /// Remove the credential. Returns whether one existed.
    pub async fn disconnect(&self, owner_id: &str, platform: Platform) -> Result<bool> {
        self.db.delete_credential(owner_id, platform).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountIdentity, OwnerProfile};
    use tempfile::TempDir;

    async fn setup_store() -> (CredentialStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("creds.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        db.create_owner(
            &OwnerProfile {
                id: "7".to_string(),
                primary_email: None,
                given_name: None,
                family_name: None,
            },
            0,
        )
        .await
        .unwrap();
        (CredentialStore::new(db), temp_dir)
    }

    fn pinterest_credential() -> PlatformCredential {
        PlatformCredential {
            owner_id: "7".to_string(),
            platform: Platform::Pinterest,
            access_token: "pina_1".to_string(),
            refresh_token: Some("pinr_1".to_string()),
            account: AccountIdentity::Resolved("maker".to_string()),
            page_access_token: None,
            display_name: Some("maker".to_string()),
            issued_at: 100,
            expires_in_seconds: Some(2_592_000),
        }
    }

    #[tokio::test]
    async fn test_rotate_replaces_rotated_refresh_token() {
        let (store, _temp_dir) = setup_store().await;
        store.save(&pinterest_credential()).await.unwrap();

        let grant = TokenGrant {
            access_token: "pina_2".to_string(),
            refresh_token: Some("pinr_2".to_string()),
            expires_in_seconds: Some(2_592_000),
        };
        assert!(store.rotate("7", Platform::Pinterest, &grant, 200).await.unwrap());

        let loaded = store.load("7", Platform::Pinterest).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "pina_2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("pinr_2"));
        assert_eq!(loaded.issued_at, 200);
    }

    #[tokio::test]
    async fn test_rotate_without_credential_reports_false() {
        let (store, _temp_dir) = setup_store().await;
        let grant = TokenGrant {
            access_token: "x".to_string(),
            refresh_token: None,
            expires_in_seconds: None,
        };
        assert!(!store.rotate("7", Platform::YouTube, &grant, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_clears_credential() {
        let (store, _temp_dir) = setup_store().await;
        store.save(&pinterest_credential()).await.unwrap();

        assert!(store.disconnect("7", Platform::Pinterest).await.unwrap());
        assert!(store.list("7").await.unwrap().is_empty());
    }
}
