//! YouTube adapter
//!
//! Videos go up through the resumable upload protocol in two phases: an
//! init request opens a session and answers with the upload URL in its
//! `Location` header, then the bytes are PUT there with an explicit
//! `Content-Length`. A failed PUT abandons the session; the next attempt
//! starts again from init.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};
use url::Url;

use super::http::{
    check, fetch_media, map_status_error, read_insight_json, read_json, read_token_response,
    transport_error, DEFAULT_MAX_MEDIA_BYTES,
};
use super::PlatformAdapter;
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{
    InsightMetrics, Platform, PlatformCredential, PublishContent, ResolvedIdentity, TokenGrant,
    UnresolvedReason,
};

const TITLE_LIMIT: usize = 100;
const DESCRIPTION_LIMIT: usize = 5_000;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.readonly",
];

/// Google and YouTube base URLs
#[derive(Debug, Clone)]
pub struct YouTubeEndpoints {
    pub auth_url: String,
    pub token_url: String,
    /// Data API base, e.g. `https://www.googleapis.com/youtube/v3`
    pub api_base: String,
    /// Upload API base, e.g. `https://www.googleapis.com/upload/youtube/v3`
    pub upload_base: String,
}

impl Default for YouTubeEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/youtube/v3".to_string(),
        }
    }
}

impl YouTubeEndpoints {
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
            api_base: format!("{}/youtube/v3", base),
            upload_base: format!("{}/upload/youtube/v3", base),
        }
    }
}

pub struct YouTubeAdapter {
    client: reqwest::Client,
    endpoints: YouTubeEndpoints,
    max_media_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VideoStatistics {
    #[serde(default)]
    statistics: Statistics,
}

/// The Data API reports counts as decimal strings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    like_count: Option<String>,
    #[serde(default)]
    comment_count: Option<String>,
}

fn count(value: &Option<String>) -> i64 {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Explicit title, else the first line of the text, cut to the title limit
fn video_title(content: &PublishContent) -> String {
    let source = content
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| content.text.lines().next().unwrap_or_default());
    let title: String = source.trim().chars().take(TITLE_LIMIT).collect();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

impl YouTubeAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: YouTubeEndpoints::default(),
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    pub fn with_endpoints(mut self, endpoints: YouTubeEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_max_media_bytes(mut self, max_media_bytes: u64) -> Self {
        self.max_media_bytes = max_media_bytes;
        self
    }

    async fn my_channel(&self, access_token: &str) -> Result<Option<Channel>> {
        let context = "fetch channel";
        let response = self
            .client
            .get(format!("{}/channels", self.endpoints.api_base))
            .query(&[("part", "snippet"), ("mine", "true")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::YouTube, context, e))?;
        let channels: ItemList<Channel> = read_json(Platform::YouTube, context, response).await?;
        Ok(channels.items.into_iter().next())
    }

    /// Phase one: open a resumable session and return its upload URL
    async fn init_upload(
        &self,
        token: &str,
        content: &PublishContent,
        content_type: &str,
        length: u64,
    ) -> Result<String> {
        let platform = Platform::YouTube;
        let context = "init upload";
        let response = self
            .client
            .post(format!("{}/videos", self.endpoints.upload_base))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", length.to_string())
            .json(&json!({
                "snippet": {
                    "title": video_title(content),
                    "description": content.text,
                },
                "status": {"privacyStatus": "public"}
            }))
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::TokenExpired(
                "YouTube rejected the access token when opening the upload session. \
                 Suggestion: reconnect the YouTube account."
                    .to_string(),
            )
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(platform, context, status, &body).into());
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::Posting(
                    "YouTube opened an upload session without an upload URL".to_string(),
                )
                .into()
            })
    }

    async fn google_token_request(&self, form: &[(&str, &str)], context: &str) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::YouTube, context, e))?;
        read_token_response(Platform::YouTube, response).await
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoints.auth_url)
            .map_err(|e| PlatformError::Authentication(format!("Invalid Google OAuth URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &settings.client_id)
            .append_pair("redirect_uri", &settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<TokenGrant> {
        self.google_token_request(
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.expose_secret()),
                ("redirect_uri", settings.redirect_uri.as_str()),
            ],
            "token exchange",
        )
        .await
    }

    async fn resolve_identity(&self, access_token: &str) -> Result<ResolvedIdentity> {
        match self.my_channel(access_token).await? {
            Some(channel) => {
                let title = channel.snippet.and_then(|s| s.title);
                Ok(ResolvedIdentity::resolved(channel.id, title))
            }
            None => {
                warn!("Google account has no YouTube channel");
                Ok(ResolvedIdentity::unresolved(UnresolvedReason::NoChannel))
            }
        }
    }

    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String> {
        self.validate_content(content)?;
        credential.account.require(Platform::YouTube)?;
        let token = credential.access_token.as_str();

        let Some(video) = content.videos().next() else {
            return Err(PlatformError::Validation("YouTube posts require a video".to_string()).into());
        };

        let media = fetch_media(&self.client, Platform::YouTube, &video.url, self.max_media_bytes).await?;
        let length = media.length;

        let upload_url = self
            .init_upload(token, content, &media.content_type, length)
            .await?;
        debug!(bytes = length, "Opened YouTube upload session");

        let context = "upload video";
        let response = self
            .client
            .put(&upload_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, media.content_type)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(media.body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::YouTube, context, e))?;
        let response = check(Platform::YouTube, context, response).await?;
        let uploaded: UploadedVideo = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::YouTube, context, e))?;

        info!(video_id = %uploaded.id, "Uploaded YouTube video");
        Ok(uploaded.id)
    }

    async fn fetch_insights(
        &self,
        credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics> {
        let platform = Platform::YouTube;
        let context = "fetch statistics";
        let response = self
            .client
            .get(format!("{}/videos", self.endpoints.api_base))
            .query(&[("part", "statistics"), ("id", platform_post_id)])
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;

        let videos: ItemList<VideoStatistics> =
            match read_insight_json(platform, platform_post_id, context, response).await? {
                ControlFlow::Continue(videos) => videos,
                ControlFlow::Break(metrics) => return Ok(metrics),
            };

        // Unknown ids come back as an empty list rather than a 404
        let Some(video) = videos.items.into_iter().next() else {
            return Ok(InsightMetrics::deleted());
        };

        let views = count(&video.statistics.view_count);
        Ok(InsightMetrics::new(
            count(&video.statistics.like_count),
            count(&video.statistics.comment_count),
            views,
            views,
        ))
    }

    async fn display_name(&self, credential: &PlatformCredential) -> Result<Option<String>> {
        Ok(self
            .my_channel(&credential.access_token)
            .await?
            .and_then(|c| c.snippet)
            .and_then(|s| s.title))
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, settings: &OAuthSettings, refresh_token: &str) -> Result<TokenGrant> {
        // Google rarely rotates the refresh token; a missing one means keep the old
        self.google_token_request(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.expose_secret()),
            ],
            "token refresh",
        )
        .await
    }

    fn character_limit(&self) -> Option<usize> {
        Some(DESCRIPTION_LIMIT)
    }

    fn validate_content(&self, content: &PublishContent) -> Result<()> {
        let videos = content.videos().count();
        if videos != 1 || content.media.len() != 1 {
            return Err(PlatformError::Validation(format!(
                "YouTube posts require exactly one video (got {} media items, {} videos)",
                content.media.len(),
                videos
            ))
            .into());
        }

        if let Some(title) = &content.title {
            let count = title.chars().count();
            if count > TITLE_LIMIT {
                return Err(PlatformError::Validation(format!(
                    "Video title exceeds YouTube's {} character limit (current: {} characters)",
                    TITLE_LIMIT, count
                ))
                .into());
            }
        }

        let count = content.text.chars().count();
        if count > DESCRIPTION_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Video description exceeds YouTube's {} character limit (current: {} characters)",
                DESCRIPTION_LIMIT, count
            ))
            .into());
        }

        Ok(())
    }
}
