//! Database operations for SocialSync
//!
//! A single sqlite database holds owners, credentials, publish transactions,
//! insight snapshots and the audit log. Every write is a keyed upsert or an
//! append; nothing here spans more than one row-level statement.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::audit::AuditEntry;
use crate::error::{DbError, Result};
use crate::types::{
    AccountIdentity, InsightSnapshot, OwnerProfile, Platform, PlatformCredential,
    PublishTransaction, UnresolvedReason,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Owners
    // ------------------------------------------------------------------

    pub async fn get_owner(&self, owner_id: &str) -> Result<Option<OwnerProfile>> {
        let row = sqlx::query(
            r#"
            SELECT id, primary_email, given_name, family_name
            FROM owners WHERE id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| OwnerProfile {
            id: r.get("id"),
            primary_email: r.get("primary_email"),
            given_name: r.get("given_name"),
            family_name: r.get("family_name"),
        }))
    }

    /// Insert an owner; an existing row with the same id is left untouched
    pub async fn create_owner(&self, owner: &OwnerProfile, created_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO owners (id, primary_email, given_name, family_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&owner.id)
        .bind(&owner.primary_email)
        .bind(&owner.given_name)
        .bind(&owner.family_name)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Insert or overwrite the credential for (owner, platform)
    pub async fn upsert_credential(&self, credential: &PlatformCredential) -> Result<()> {
        let (account_id, unresolved_reason) = match &credential.account {
            AccountIdentity::Resolved(id) => (Some(id.as_str()), None),
            AccountIdentity::Unresolved(reason) => (None, Some(reason.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO platform_credentials (
                owner_id, platform, access_token, refresh_token, account_id,
                unresolved_reason, page_access_token, display_name, issued_at,
                expires_in_seconds
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                account_id = excluded.account_id,
                unresolved_reason = excluded.unresolved_reason,
                page_access_token = excluded.page_access_token,
                display_name = excluded.display_name,
                issued_at = excluded.issued_at,
                expires_in_seconds = excluded.expires_in_seconds
            "#,
        )
        .bind(&credential.owner_id)
        .bind(credential.platform.as_str())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(account_id)
        .bind(unresolved_reason)
        .bind(&credential.page_access_token)
        .bind(&credential.display_name)
        .bind(credential.issued_at)
        .bind(credential.expires_in_seconds)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_credential(
        &self,
        owner_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformCredential>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, platform, access_token, refresh_token, account_id,
                   unresolved_reason, page_access_token, display_name, issued_at,
                   expires_in_seconds
            FROM platform_credentials
            WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| credential_from_row(&r)).transpose()
    }

    pub async fn list_credentials(&self, owner_id: &str) -> Result<Vec<PlatformCredential>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, platform, access_token, refresh_token, account_id,
                   unresolved_reason, page_access_token, display_name, issued_at,
                   expires_in_seconds
            FROM platform_credentials
            WHERE owner_id = ?
            ORDER BY platform
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(credential_from_row).collect()
    }

    /// Replace the access token after a refresh.
    ///
    /// A `None` refresh token keeps the stored one (platform did not rotate it).
    pub async fn update_tokens(
        &self,
        owner_id: &str,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        issued_at: i64,
        expires_in_seconds: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE platform_credentials
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                issued_at = ?,
                expires_in_seconds = ?
            WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(issued_at)
        .bind(expires_in_seconds)
        .bind(owner_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_credential(&self, owner_id: &str, platform: Platform) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM platform_credentials WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Publish transactions
    // ------------------------------------------------------------------

    pub async fn create_publish_transaction(&self, tx: &PublishTransaction) -> Result<()> {
        let media_refs = serde_json::to_string(&tx.media_refs).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO publish_transactions (
                id, owner_id, platform, platform_post_id, published, media_refs,
                error_message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.owner_id)
        .bind(tx.platform.as_str())
        .bind(&tx.platform_post_id)
        .bind(tx.published)
        .bind(media_refs)
        .bind(&tx.error_message)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Latest successful publish that produced `platform_post_id`
    pub async fn find_published(
        &self,
        platform: Platform,
        platform_post_id: &str,
    ) -> Result<Option<PublishTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, platform, platform_post_id, published, media_refs,
                   error_message, created_at
            FROM publish_transactions
            WHERE platform = ? AND platform_post_id = ? AND published = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(platform.as_str())
        .bind(platform_post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| transaction_from_row(&r)).transpose()
    }

    pub async fn list_publish_transactions(&self, owner_id: &str) -> Result<Vec<PublishTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, platform, platform_post_id, published, media_refs,
                   error_message, created_at
            FROM publish_transactions
            WHERE owner_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(transaction_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Insight snapshots
    // ------------------------------------------------------------------

    pub async fn get_snapshot(&self, platform_post_id: &str) -> Result<Option<InsightSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT platform_post_id, platform, likes, comments, reach, impressions,
                   engagement_rate, last_updated_at, is_deleted
            FROM insight_snapshots
            WHERE platform_post_id = ?
            "#,
        )
        .bind(platform_post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// Insert or update a snapshot in place.
    ///
    /// `last_updated_at` never moves backwards and `is_deleted` never resets.
    pub async fn upsert_snapshot(&self, snapshot: &InsightSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO insight_snapshots (
                platform_post_id, platform, likes, comments, reach, impressions,
                engagement_rate, last_updated_at, is_deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(platform_post_id) DO UPDATE SET
                likes = excluded.likes,
                comments = excluded.comments,
                reach = excluded.reach,
                impressions = excluded.impressions,
                engagement_rate = excluded.engagement_rate,
                last_updated_at = MAX(insight_snapshots.last_updated_at, excluded.last_updated_at),
                is_deleted = MAX(insight_snapshots.is_deleted, excluded.is_deleted)
            "#,
        )
        .bind(&snapshot.platform_post_id)
        .bind(snapshot.platform.as_str())
        .bind(snapshot.likes)
        .bind(snapshot.comments)
        .bind(snapshot.reach)
        .bind(snapshot.impressions)
        .bind(snapshot.engagement_rate)
        .bind(snapshot.last_updated_at)
        .bind(snapshot.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (owner_id, platform, action, outcome, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.owner_id)
        .bind(entry.platform.map(|p| p.as_str()))
        .bind(&entry.action)
        .bind(&entry.outcome)
        .bind(entry.detail.as_ref().map(|d| d.to_string()))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_audit(&self, owner_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, platform, action, outcome, detail, created_at
            FROM audit_log
            WHERE owner_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let platform: Option<String> = r.get("platform");
                let detail: Option<String> = r.get("detail");
                Ok(AuditEntry {
                    owner_id: r.get("owner_id"),
                    platform: platform.map(|p| parse_platform(&p)).transpose()?,
                    action: r.get("action"),
                    outcome: r.get("outcome"),
                    detail: detail.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}

fn parse_platform(value: &str) -> Result<Platform> {
    value
        .parse()
        .map_err(|e: String| DbError::CorruptRow(e).into())
}

fn credential_from_row(r: &SqliteRow) -> Result<PlatformCredential> {
    let platform = parse_platform(&r.get::<String, _>("platform"))?;
    let account_id: Option<String> = r.get("account_id");
    let unresolved_reason: Option<String> = r.get("unresolved_reason");

    let account = match (account_id, unresolved_reason) {
        (Some(id), _) => AccountIdentity::Resolved(id),
        (None, Some(reason)) => AccountIdentity::Unresolved(
            reason
                .parse::<UnresolvedReason>()
                .map_err(DbError::CorruptRow)?,
        ),
        (None, None) => {
            return Err(DbError::CorruptRow(format!(
                "credential for {} has neither account id nor unresolved reason",
                platform
            ))
            .into())
        }
    };

    Ok(PlatformCredential {
        owner_id: r.get("owner_id"),
        platform,
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        account,
        page_access_token: r.get("page_access_token"),
        display_name: r.get("display_name"),
        issued_at: r.get("issued_at"),
        expires_in_seconds: r.get("expires_in_seconds"),
    })
}

fn transaction_from_row(r: &SqliteRow) -> Result<PublishTransaction> {
    let media_refs: String = r.get("media_refs");
    Ok(PublishTransaction {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        platform: parse_platform(&r.get::<String, _>("platform"))?,
        platform_post_id: r.get("platform_post_id"),
        published: r.get("published"),
        media_refs: serde_json::from_str(&media_refs).unwrap_or_default(),
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
    })
}

fn snapshot_from_row(r: &SqliteRow) -> Result<InsightSnapshot> {
    Ok(InsightSnapshot {
        platform_post_id: r.get("platform_post_id"),
        platform: parse_platform(&r.get::<String, _>("platform"))?,
        likes: r.get("likes"),
        comments: r.get("comments"),
        reach: r.get("reach"),
        impressions: r.get("impressions"),
        engagement_rate: r.get("engagement_rate"),
        last_updated_at: r.get("last_updated_at"),
        is_deleted: r.get("is_deleted"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (db, temp_dir)
    }

    fn owner(id: &str) -> OwnerProfile {
        OwnerProfile {
            id: id.to_string(),
            primary_email: Some(format!("{}@example.com", id)),
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
        }
    }

    fn credential(owner_id: &str, platform: Platform, token: &str) -> PlatformCredential {
        PlatformCredential {
            owner_id: owner_id.to_string(),
            platform,
            access_token: token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            account: AccountIdentity::Resolved("acct-1".to_string()),
            page_access_token: None,
            display_name: Some("Ada".to_string()),
            issued_at: 1_000,
            expires_in_seconds: Some(3_600),
        }
    }

    #[tokio::test]
    async fn test_create_owner_is_idempotent() {
        let (db, _temp_dir) = setup_test_db().await;

        db.create_owner(&owner("42"), 1).await.unwrap();
        db.create_owner(&owner("42"), 2).await.unwrap();

        let loaded = db.get_owner("42").await.unwrap().unwrap();
        assert_eq!(loaded.primary_email.as_deref(), Some("42@example.com"));
        assert!(db.get_owner("43").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_credential_overwrites() {
        let (db, _temp_dir) = setup_test_db().await;
        db.create_owner(&owner("42"), 1).await.unwrap();

        db.upsert_credential(&credential("42", Platform::LinkedIn, "first"))
            .await
            .unwrap();
        db.upsert_credential(&credential("42", Platform::LinkedIn, "second"))
            .await
            .unwrap();

        let all = db.list_credentials("42").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].access_token, "second");
    }

    #[tokio::test]
    async fn test_unresolved_identity_round_trips() {
        let (db, _temp_dir) = setup_test_db().await;
        db.create_owner(&owner("42"), 1).await.unwrap();

        let mut cred = credential("42", Platform::Instagram, "token");
        cred.account = AccountIdentity::Unresolved(UnresolvedReason::NoBusinessAccount);
        db.upsert_credential(&cred).await.unwrap();

        let loaded = db
            .get_credential("42", Platform::Instagram)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.account,
            AccountIdentity::Unresolved(UnresolvedReason::NoBusinessAccount)
        );
    }

    #[tokio::test]
    async fn test_update_tokens_keeps_refresh_token_when_not_rotated() {
        let (db, _temp_dir) = setup_test_db().await;
        db.create_owner(&owner("42"), 1).await.unwrap();
        db.upsert_credential(&credential("42", Platform::YouTube, "old"))
            .await
            .unwrap();

        let updated = db
            .update_tokens("42", Platform::YouTube, "new", None, 5_000, Some(3_599))
            .await
            .unwrap();
        assert!(updated);

        let loaded = db.get_credential("42", Platform::YouTube).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "new");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(loaded.issued_at, 5_000);
    }

    #[tokio::test]
    async fn test_delete_credential() {
        let (db, _temp_dir) = setup_test_db().await;
        db.create_owner(&owner("42"), 1).await.unwrap();
        db.upsert_credential(&credential("42", Platform::Pinterest, "t"))
            .await
            .unwrap();

        assert!(db.delete_credential("42", Platform::Pinterest).await.unwrap());
        assert!(!db.delete_credential("42", Platform::Pinterest).await.unwrap());
        assert!(db.get_credential("42", Platform::Pinterest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_upsert_is_monotonic_and_deletion_sticky() {
        let (db, _temp_dir) = setup_test_db().await;

        let mut snapshot = InsightSnapshot {
            platform_post_id: "post-1".to_string(),
            platform: Platform::Facebook,
            likes: 3,
            comments: 1,
            reach: 10,
            impressions: 20,
            engagement_rate: 40.0,
            last_updated_at: 2_000,
            is_deleted: true,
        };
        db.upsert_snapshot(&snapshot).await.unwrap();

        snapshot.last_updated_at = 1_000;
        snapshot.is_deleted = false;
        snapshot.likes = 9;
        db.upsert_snapshot(&snapshot).await.unwrap();

        let loaded = db.get_snapshot("post-1").await.unwrap().unwrap();
        assert_eq!(loaded.likes, 9);
        assert_eq!(loaded.last_updated_at, 2_000);
        assert!(loaded.is_deleted);
    }

    #[tokio::test]
    async fn test_find_published_ignores_failed_attempts() {
        let (db, _temp_dir) = setup_test_db().await;

        let failed = PublishTransaction {
            id: "tx-1".to_string(),
            owner_id: "42".to_string(),
            platform: Platform::LinkedIn,
            platform_post_id: None,
            published: false,
            media_refs: vec![],
            error_message: Some("boom".to_string()),
            created_at: 1,
        };
        let ok = PublishTransaction {
            id: "tx-2".to_string(),
            platform_post_id: Some("urn:li:share:1".to_string()),
            published: true,
            error_message: None,
            media_refs: vec!["https://cdn/a.jpg".to_string()],
            created_at: 2,
            ..failed.clone()
        };
        db.create_publish_transaction(&failed).await.unwrap();
        db.create_publish_transaction(&ok).await.unwrap();

        let found = db
            .find_published(Platform::LinkedIn, "urn:li:share:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "tx-2");
        assert_eq!(found.media_refs, vec!["https://cdn/a.jpg".to_string()]);
        assert_eq!(db.list_publish_transactions("42").await.unwrap().len(), 2);
    }
}
