//! LinkedIn member posting adapter
//!
//! Media posts follow a strict three-step chain: register an upload, PUT the
//! bytes to the returned upload URL, then create the UGC post referencing the
//! registered assets. A post carries either images or one video, never both.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::ops::ControlFlow;
use tracing::{debug, warn};
use url::Url;

use super::http::{
    check, fetch_media, read_insight_json, read_json, read_token_response, transport_error,
    DEFAULT_MAX_MEDIA_BYTES,
};
use super::PlatformAdapter;
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{
    InsightMetrics, MediaItem, MediaKind, Platform, PlatformCredential, PublishContent,
    ResolvedIdentity, TokenGrant,
};

const LINKEDIN_CHARACTER_LIMIT: usize = 3_000;

const SCOPES: &[&str] = &["openid", "profile", "email", "w_member_social"];

const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

/// LinkedIn base URLs
#[derive(Debug, Clone)]
pub struct LinkedInEndpoints {
    /// OAuth host, `authorization` and `accessToken` live under it
    pub oauth_base: String,
    pub api_base: String,
}

impl Default for LinkedInEndpoints {
    fn default() -> Self {
        Self {
            oauth_base: "https://www.linkedin.com/oauth/v2".to_string(),
            api_base: "https://api.linkedin.com".to_string(),
        }
    }
}

impl LinkedInEndpoints {
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            oauth_base: format!("{}/oauth/v2", base),
            api_base: base.to_string(),
        }
    }
}

pub struct LinkedInAdapter {
    client: reqwest::Client,
    endpoints: LinkedInEndpoints,
    max_media_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisteredUpload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredUpload {
    asset: String,
    upload_mechanism: std::collections::HashMap<String, UploadRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialActions {
    #[serde(default)]
    likes_summary: LikesSummary,
    #[serde(default)]
    comments_summary: CommentsSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikesSummary {
    #[serde(default)]
    total_likes: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsSummary {
    #[serde(default)]
    aggregated_total_comments: i64,
}

/// Media actually attached to a post after applying the images-or-video rule
fn select_media(content: &PublishContent) -> (Vec<&MediaItem>, Option<MediaKind>) {
    let images: Vec<&MediaItem> = content.images().collect();
    let videos: Vec<&MediaItem> = content.videos().collect();

    if !images.is_empty() {
        if !videos.is_empty() {
            warn!(
                dropped_videos = videos.len(),
                "LinkedIn posts cannot mix images and video, posting images only"
            );
        }
        return (images, Some(MediaKind::Image));
    }

    match videos.split_first() {
        Some((video, rest)) => {
            if !rest.is_empty() {
                warn!(dropped_videos = rest.len(), "LinkedIn posts carry one video");
            }
            (vec![*video], Some(MediaKind::Video))
        }
        None => (Vec::new(), None),
    }
}

impl LinkedInAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: LinkedInEndpoints::default(),
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    pub fn with_endpoints(mut self, endpoints: LinkedInEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_max_media_bytes(mut self, max_media_bytes: u64) -> Self {
        self.max_media_bytes = max_media_bytes;
        self
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.api_base, path.trim_start_matches('/'))
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        let context = "fetch member profile";
        let response = self
            .client
            .get(self.api("v2/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, context, e))?;
        read_json(Platform::LinkedIn, context, response).await
    }

    /// Register, then upload one media item. Returns the asset URN.
    async fn upload_asset(&self, token: &str, author: &str, item: &MediaItem) -> Result<String> {
        let platform = Platform::LinkedIn;
        let recipe = match item.kind {
            MediaKind::Image => "urn:li:digitalmediaRecipe:feedshare-image",
            MediaKind::Video => "urn:li:digitalmediaRecipe:feedshare-video",
        };

        let context = "register upload";
        let response = self
            .client
            .post(self.api("v2/assets?action=registerUpload"))
            .bearer_auth(token)
            .json(&json!({
                "registerUploadRequest": {
                    "recipes": [recipe],
                    "owner": author,
                    "serviceRelationships": [{
                        "relationshipType": "OWNER",
                        "identifier": "urn:li:userGeneratedContent"
                    }]
                }
            }))
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        let registered: RegisterUploadResponse = read_json(platform, context, response).await?;

        let upload_url = registered
            .value
            .upload_mechanism
            .get(UPLOAD_MECHANISM)
            .map(|m| m.upload_url.clone())
            .ok_or_else(|| {
                PlatformError::Posting("LinkedIn registerUpload returned no upload URL".to_string())
            })?;

        let media = fetch_media(&self.client, platform, &item.url, self.max_media_bytes).await?;
        debug!(
            asset = %registered.value.asset,
            bytes = media.length,
            "Uploading media to LinkedIn"
        );

        let context = "upload media";
        let response = self
            .client
            .put(&upload_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, media.content_type)
            .header(reqwest::header::CONTENT_LENGTH, media.length)
            .body(media.body)
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        check(platform, context, response).await?;

        Ok(registered.value.asset)
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/authorization", self.endpoints.oauth_base))
            .map_err(|e| PlatformError::Authentication(format!("Invalid LinkedIn OAuth URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &settings.client_id)
            .append_pair("redirect_uri", &settings.redirect_uri)
            .append_pair("state", state)
            .append_pair("scope", &SCOPES.join(" "));
        Ok(url)
    }

    async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<TokenGrant> {
        let response = self
            .client
            .post(format!("{}/accessToken", self.endpoints.oauth_base))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", settings.redirect_uri.as_str()),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, "token exchange", e))?;
        read_token_response(Platform::LinkedIn, response).await
    }

    async fn resolve_identity(&self, access_token: &str) -> Result<ResolvedIdentity> {
        let info = self.user_info(access_token).await?;
        Ok(ResolvedIdentity::resolved(info.sub, info.name))
    }

    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String> {
        self.validate_content(content)?;
        let member_id = credential.account.require(Platform::LinkedIn)?;
        let author = format!("urn:li:person:{}", member_id);
        let token = credential.access_token.as_str();

        let (media, kind) = select_media(content);

        // Each step needs the previous response, so uploads run in order
        let mut assets = Vec::with_capacity(media.len());
        for item in media {
            assets.push(self.upload_asset(token, &author, item).await?);
        }

        let category = match kind {
            Some(MediaKind::Image) => "IMAGE",
            Some(MediaKind::Video) => "VIDEO",
            None => "NONE",
        };
        let media_entries: Vec<serde_json::Value> = assets
            .iter()
            .map(|asset| json!({"status": "READY", "media": asset}))
            .collect();

        let context = "create post";
        let response = self
            .client
            .post(self.api("v2/ugcPosts"))
            .bearer_auth(token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&json!({
                "author": author,
                "lifecycleState": "PUBLISHED",
                "specificContent": {
                    "com.linkedin.ugc.ShareContent": {
                        "shareCommentary": {"text": content.text},
                        "shareMediaCategory": category,
                        "media": media_entries
                    }
                },
                "visibility": {"com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"}
            }))
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, context, e))?;
        let response = check(Platform::LinkedIn, context, response).await?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(id) = header_id {
            return Ok(id);
        }

        let created: CreatedPost = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, context, e))?;
        created.id.ok_or_else(|| {
            PlatformError::Posting("LinkedIn accepted the post but returned no id".to_string()).into()
        })
    }

    async fn fetch_insights(
        &self,
        credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics> {
        let platform = Platform::LinkedIn;
        let context = "fetch social actions";
        let encoded: String = url::form_urlencoded::byte_serialize(platform_post_id.as_bytes()).collect();

        let response = self
            .client
            .get(self.api(&format!("v2/socialActions/{}", encoded)))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;

        let actions: SocialActions =
            match read_insight_json(platform, platform_post_id, context, response).await? {
                ControlFlow::Continue(actions) => actions,
                ControlFlow::Break(metrics) => return Ok(metrics),
            };

        // Member posts expose no reach or impression counts
        Ok(InsightMetrics::new(
            actions.likes_summary.total_likes,
            actions.comments_summary.aggregated_total_comments,
            0,
            0,
        ))
    }

    async fn display_name(&self, credential: &PlatformCredential) -> Result<Option<String>> {
        Ok(self.user_info(&credential.access_token).await?.name)
    }

    fn character_limit(&self) -> Option<usize> {
        Some(LINKEDIN_CHARACTER_LIMIT)
    }
}
