//! Core types for SocialSync

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Social platforms an owner can connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Facebook,
    Instagram,
    LinkedIn,
    YouTube,
    Pinterest,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::LinkedIn,
        Platform::YouTube,
        Platform::Pinterest,
    ];

    /// Upper-case wire token, as used in OAuth state and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "FACEBOOK",
            Platform::Instagram => "INSTAGRAM",
            Platform::LinkedIn => "LINKEDIN",
            Platform::YouTube => "YOUTUBE",
            Platform::Pinterest => "PINTEREST",
        }
    }

    /// Lower-case key used in configuration sections
    pub fn config_key(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::LinkedIn => "linkedin",
            Platform::YouTube => "youtube",
            Platform::Pinterest => "pinterest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FACEBOOK" => Ok(Platform::Facebook),
            "INSTAGRAM" => Ok(Platform::Instagram),
            "LINKEDIN" => Ok(Platform::LinkedIn),
            "YOUTUBE" => Ok(Platform::YouTube),
            "PINTEREST" => Ok(Platform::Pinterest),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: facebook, instagram, linkedin, youtube, pinterest",
                s
            )),
        }
    }
}

/// Why an account identity could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedReason {
    /// No Facebook Page of the user links an Instagram Business Account
    NoBusinessAccount,
    /// The Google account has no YouTube channel
    NoChannel,
}

impl UnresolvedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnresolvedReason::NoBusinessAccount => "no-business-account",
            UnresolvedReason::NoChannel => "no-channel",
        }
    }
}

impl FromStr for UnresolvedReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-business-account" => Ok(UnresolvedReason::NoBusinessAccount),
            "no-channel" => Ok(UnresolvedReason::NoChannel),
            other => Err(format!("Unknown unresolved reason: {}", other)),
        }
    }
}

/// The platform-side account a credential acts as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum AccountIdentity {
    Resolved(String),
    Unresolved(UnresolvedReason),
}

impl AccountIdentity {
    pub fn account_id(&self) -> Option<&str> {
        match self {
            AccountIdentity::Resolved(id) => Some(id),
            AccountIdentity::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AccountIdentity::Resolved(_))
    }

    /// The resolved account id, or an `IdentityUnresolved` error naming the platform
    pub fn require(&self, platform: Platform) -> Result<&str, crate::error::PlatformError> {
        match self {
            AccountIdentity::Resolved(id) => Ok(id),
            AccountIdentity::Unresolved(reason) => {
                Err(crate::error::PlatformError::IdentityUnresolved(format!(
                    "{} account is unresolved ({}). Reconnect after linking the account.",
                    platform,
                    reason.as_str()
                )))
            }
        }
    }
}

/// Result of account discovery for a freshly exchanged token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub account: AccountIdentity,
    pub display_name: Option<String>,
    /// Facebook page token, used instead of the user token for page calls
    pub page_access_token: Option<String>,
}

impl ResolvedIdentity {
    pub fn resolved(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            account: AccountIdentity::Resolved(id.into()),
            display_name,
            page_access_token: None,
        }
    }

    pub fn unresolved(reason: UnresolvedReason) -> Self {
        Self {
            account: AccountIdentity::Unresolved(reason),
            display_name: None,
            page_access_token: None,
        }
    }
}

/// Tokens returned by an authorization-code exchange or a refresh
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

/// Stored credential for one (owner, platform) pair
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformCredential {
    pub owner_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub account: AccountIdentity,
    pub page_access_token: Option<String>,
    pub display_name: Option<String>,
    pub issued_at: i64,
    pub expires_in_seconds: Option<i64>,
}

impl PlatformCredential {
    /// Build a credential from an exchanged grant and the discovered identity
    pub fn from_grant(
        owner_id: &str,
        platform: Platform,
        grant: TokenGrant,
        identity: ResolvedIdentity,
        issued_at: i64,
    ) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            platform,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            account: identity.account,
            page_access_token: identity.page_access_token,
            display_name: identity.display_name,
            issued_at,
            expires_in_seconds: grant.expires_in_seconds,
        }
    }

    /// Unix timestamp after which the access token is no longer valid
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_in_seconds.map(|secs| self.issued_at + secs)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// True when the token expires within `window_secs` of `now` (or already has)
    pub fn expires_within(&self, now: i64, window_secs: i64) -> bool {
        self.expires_at().is_some_and(|at| now + window_secs >= at)
    }

    /// Token used for calls acting as the resolved account
    pub fn acting_token(&self) -> &str {
        self.page_access_token
            .as_deref()
            .unwrap_or(&self.access_token)
    }
}

impl fmt::Debug for PlatformCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredential")
            .field("owner_id", &self.owner_id)
            .field("platform", &self.platform)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("account", &self.account)
            .field(
                "page_access_token",
                &self.page_access_token.as_ref().map(|_| "[redacted]"),
            )
            .field("display_name", &self.display_name)
            .field("issued_at", &self.issued_at)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A media reference attached to a post, fetched by URL at publish time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
        }
    }

    /// Guess the kind from the URL's file extension, defaulting to image
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default().to_lowercase();
        let is_video = [".mp4", ".mov", ".m4v", ".webm", ".avi"]
            .iter()
            .any(|ext| path.ends_with(ext));
        if is_video {
            Self::video(url)
        } else {
            Self::image(url)
        }
    }
}

/// A logical post to publish on one or more platforms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishContent {
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    /// Optional title (YouTube video title, Pinterest pin title)
    #[serde(default)]
    pub title: Option<String>,
    /// Pinterest board to pin to; falls back to the configured default board
    #[serde(default)]
    pub board_id: Option<String>,
}

impl PublishContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: MediaItem) -> Self {
        self.media.push(media);
        self
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| m.kind == MediaKind::Image)
    }

    pub fn videos(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| m.kind == MediaKind::Video)
    }

    pub fn media_refs(&self) -> Vec<String> {
        self.media.iter().map(|m| m.url.clone()).collect()
    }
}

/// Record of one publish attempt on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTransaction {
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub platform_post_id: Option<String>,
    pub published: bool,
    pub media_refs: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Metrics returned by a platform's reporting API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightMetrics {
    pub likes: i64,
    pub comments: i64,
    pub reach: i64,
    pub impressions: i64,
    pub engagement_rate: f64,
    pub is_deleted: bool,
    /// Zeroed because the platform denied or throttled the request
    #[serde(skip)]
    pub degraded: bool,
}

impl InsightMetrics {
    pub fn new(likes: i64, comments: i64, reach: i64, impressions: i64) -> Self {
        Self {
            likes,
            comments,
            reach,
            impressions,
            engagement_rate: engagement_rate(likes, comments, reach, impressions),
            is_deleted: false,
            degraded: false,
        }
    }

    pub fn zeroed() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Zeroed metrics standing in for a denied or throttled fetch
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Self::zeroed()
        }
    }

    /// Metrics for a post the platform reports as gone
    pub fn deleted() -> Self {
        Self {
            is_deleted: true,
            ..Self::zeroed()
        }
    }
}

/// (likes + comments) / reach as a percentage, using impressions when reach is 0
pub fn engagement_rate(likes: i64, comments: i64, reach: i64, impressions: i64) -> f64 {
    let audience = if reach > 0 { reach } else { impressions };
    if audience <= 0 {
        return 0.0;
    }
    let rate = (likes + comments) as f64 / audience as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Cached metrics for one platform post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSnapshot {
    pub platform_post_id: String,
    pub platform: Platform,
    pub likes: i64,
    pub comments: i64,
    pub reach: i64,
    pub impressions: i64,
    pub engagement_rate: f64,
    pub last_updated_at: i64,
    pub is_deleted: bool,
}

impl InsightSnapshot {
    pub fn from_metrics(
        platform_post_id: &str,
        platform: Platform,
        metrics: &InsightMetrics,
        now: i64,
    ) -> Self {
        Self {
            platform_post_id: platform_post_id.to_string(),
            platform,
            likes: metrics.likes,
            comments: metrics.comments,
            reach: metrics.reach,
            impressions: metrics.impressions,
            engagement_rate: metrics.engagement_rate,
            last_updated_at: now,
            is_deleted: metrics.is_deleted,
        }
    }

    /// The same metrics, marked deleted as of `now`
    pub fn into_deleted(self, now: i64) -> Self {
        Self {
            last_updated_at: now,
            is_deleted: true,
            ..self
        }
    }

    /// Placeholder returned when nothing is cached and the live fetch failed
    pub fn zeroed(platform_post_id: &str, platform: Platform, now: i64) -> Self {
        Self::from_metrics(platform_post_id, platform, &InsightMetrics::zeroed(), now)
    }
}

/// Owner record as known locally and by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub id: String,
    pub primary_email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// Per-platform connection state shown on a settings page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub platform: Platform,
    pub connected: bool,
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip_is_case_insensitive() {
        assert_eq!("facebook".parse::<Platform>().unwrap(), Platform::Facebook);
        assert_eq!("YouTube".parse::<Platform>().unwrap(), Platform::YouTube);
        assert_eq!(Platform::LinkedIn.to_string(), "LINKEDIN");
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_names_contain_no_underscore() {
        for platform in Platform::ALL {
            assert!(!platform.as_str().contains('_'));
        }
    }

    #[test]
    fn test_credential_expiry() {
        let credential = PlatformCredential {
            owner_id: "42".to_string(),
            platform: Platform::YouTube,
            access_token: "ya29".to_string(),
            refresh_token: Some("1//r".to_string()),
            account: AccountIdentity::Resolved("UC1".to_string()),
            page_access_token: None,
            display_name: None,
            issued_at: 1_000,
            expires_in_seconds: Some(3_600),
        };

        assert_eq!(credential.expires_at(), Some(4_600));
        assert!(!credential.is_expired(4_599));
        assert!(credential.is_expired(4_600));
        assert!(credential.expires_within(4_300, 300));
        assert!(!credential.expires_within(4_299, 300));
    }

    #[test]
    fn test_credential_without_expiry_never_expires() {
        let credential = PlatformCredential {
            owner_id: "42".to_string(),
            platform: Platform::Facebook,
            access_token: "EAAB".to_string(),
            refresh_token: None,
            account: AccountIdentity::Resolved("page-1".to_string()),
            page_access_token: Some("page-token".to_string()),
            display_name: None,
            issued_at: 1_000,
            expires_in_seconds: None,
        };

        assert!(!credential.is_expired(i64::MAX));
        assert_eq!(credential.acting_token(), "page-token");
    }

    #[test]
    fn test_credential_debug_redacts_tokens() {
        let credential = PlatformCredential {
            owner_id: "42".to_string(),
            platform: Platform::Pinterest,
            access_token: "pina_secret".to_string(),
            refresh_token: Some("pinr_secret".to_string()),
            account: AccountIdentity::Resolved("maker".to_string()),
            page_access_token: None,
            display_name: None,
            issued_at: 0,
            expires_in_seconds: None,
        };

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("pina_secret"));
        assert!(!debug.contains("pinr_secret"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn test_unresolved_identity_requires_reconnect_message() {
        let identity = AccountIdentity::Unresolved(UnresolvedReason::NoBusinessAccount);
        let err = identity.require(Platform::Instagram).unwrap_err();
        assert!(err.to_string().contains("no-business-account"));
        assert!(identity.account_id().is_none());
    }

    #[test]
    fn test_engagement_rate() {
        assert_eq!(engagement_rate(10, 5, 100, 400), 15.0);
        assert_eq!(engagement_rate(1, 0, 0, 3), 33.33);
        assert_eq!(engagement_rate(4, 4, 0, 0), 0.0);
    }

    #[test]
    fn test_media_kind_from_url() {
        assert_eq!(MediaItem::from_url("https://cdn/x.MP4?sig=1").kind, MediaKind::Video);
        assert_eq!(MediaItem::from_url("https://cdn/x.jpg").kind, MediaKind::Image);
    }
}
