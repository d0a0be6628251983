//! Instagram Business adapter
//!
//! Instagram business accounts are never addressed directly at connect time:
//! they are discovered by walking the user's Facebook Pages and taking the
//! first one that links an Instagram Business Account. Publishing is the
//! two-step container flow of the Graph API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::graph::{self, read_graph, GraphEndpoints, GraphList, InsightValue};
use super::http::transport_error;
use super::PlatformAdapter;
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{
    InsightMetrics, MediaKind, Platform, PlatformCredential, PublishContent, ResolvedIdentity,
    TokenGrant, UnresolvedReason,
};

const INSTAGRAM_CHARACTER_LIMIT: usize = 2_200;

const SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "instagram_manage_insights",
    "pages_show_list",
    "pages_read_engagement",
];

pub struct InstagramAdapter {
    client: reqwest::Client,
    endpoints: GraphEndpoints,
}

#[derive(Debug, Deserialize)]
struct PageBusinessLink {
    #[serde(default)]
    instagram_business_account: Option<BusinessAccount>,
}

#[derive(Debug, Deserialize)]
struct BusinessAccount {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaEngagement {
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    comments_count: i64,
}

impl InstagramAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: GraphEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: GraphEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    async fn business_account_for_page(
        &self,
        page_id: &str,
        token: &str,
    ) -> Result<Option<BusinessAccount>> {
        let context = "discover business account";
        let response = self
            .client
            .get(self.endpoints.url(page_id))
            .query(&[
                ("fields", "instagram_business_account{id,username}"),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Instagram, context, e))?;

        let link: PageBusinessLink = read_graph(Platform::Instagram, context, response)
            .await
            .map_err(|f| f.error)?;
        Ok(link.instagram_business_account)
    }

    async fn post_form(&self, path: &str, context: &str, form: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .post(self.endpoints.url(path))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Instagram, context, e))?;
        let created: Created = read_graph(Platform::Instagram, context, response)
            .await
            .map_err(|f| f.error)?;
        Ok(created.id)
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url> {
        graph::dialog_url(&self.endpoints, settings, state, SCOPES)
    }

    async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<TokenGrant> {
        graph::exchange_code(&self.client, &self.endpoints, Platform::Instagram, settings, code).await
    }

    async fn resolve_identity(&self, access_token: &str) -> Result<ResolvedIdentity> {
        let pages =
            graph::list_pages(&self.client, &self.endpoints, Platform::Instagram, access_token)
                .await?;
        debug!(pages = pages.len(), "Searching Facebook Pages for an Instagram Business Account");

        for page in &pages {
            let token = page.access_token.as_deref().unwrap_or(access_token);
            match self.business_account_for_page(&page.id, token).await {
                Ok(Some(account)) => {
                    info!(
                        page_id = %page.id,
                        instagram_account_id = %account.id,
                        "Found Instagram Business Account"
                    );
                    return Ok(ResolvedIdentity::resolved(account.id, account.username));
                }
                Ok(None) => continue,
                Err(e) => {
                    // One unreadable page does not stop the search
                    warn!(page_id = %page.id, error = %e, "Could not inspect Facebook Page");
                }
            }
        }

        warn!("No Facebook Page links an Instagram Business Account");
        Ok(ResolvedIdentity::unresolved(UnresolvedReason::NoBusinessAccount))
    }

    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String> {
        self.validate_content(content)?;
        let account_id = credential.account.require(Platform::Instagram)?;
        let token = credential.access_token.as_str();

        let media = &content.media[0];
        if content.media.len() > 1 {
            warn!(
                dropped = content.media.len() - 1,
                "Instagram single-media posts carry one item, extra media dropped"
            );
        }

        let mut form = vec![("caption", content.text.as_str()), ("access_token", token)];
        match media.kind {
            MediaKind::Image => form.push(("image_url", media.url.as_str())),
            MediaKind::Video => {
                form.push(("media_type", "REELS"));
                form.push(("video_url", media.url.as_str()));
            }
        }

        let container_id = self
            .post_form(&format!("{}/media", account_id), "create media container", &form)
            .await?;
        debug!(container_id = %container_id, "Created Instagram media container");

        self.post_form(
            &format!("{}/media_publish", account_id),
            "publish media container",
            &[("creation_id", container_id.as_str()), ("access_token", token)],
        )
        .await
    }

    async fn fetch_insights(
        &self,
        credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics> {
        let platform = Platform::Instagram;
        let token = credential.access_token.as_str();

        let context = "fetch engagement";
        let response = self
            .client
            .get(self.endpoints.url(platform_post_id))
            .query(&[("fields", "like_count,comments_count"), ("access_token", token)])
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        let engagement: MediaEngagement = match read_graph(platform, context, response).await {
            Ok(engagement) => engagement,
            Err(failure) => return graph::insight_failure(platform, platform_post_id, failure),
        };

        let context = "fetch media insights";
        let response = self
            .client
            .get(self.endpoints.url(&format!("{}/insights", platform_post_id)))
            .query(&[("metric", "reach,impressions"), ("access_token", token)])
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        let insights: GraphList<InsightValue> = match read_graph(platform, context, response).await {
            Ok(insights) => insights,
            Err(failure) => return graph::insight_failure(platform, platform_post_id, failure),
        };

        Ok(InsightMetrics::new(
            engagement.like_count,
            engagement.comments_count,
            graph::metric(&insights.data, "reach"),
            graph::metric(&insights.data, "impressions"),
        ))
    }

    async fn display_name(&self, credential: &PlatformCredential) -> Result<Option<String>> {
        let Some(account_id) = credential.account.account_id() else {
            return Ok(None);
        };

        let context = "connection status";
        let response = self
            .client
            .get(self.endpoints.url(account_id))
            .query(&[("fields", "username"), ("access_token", credential.access_token.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Instagram, context, e))?;
        let account: BusinessAccount = read_graph(Platform::Instagram, context, response)
            .await
            .map_err(|f| f.error)?;
        Ok(account.username)
    }

    fn character_limit(&self) -> Option<usize> {
        Some(INSTAGRAM_CHARACTER_LIMIT)
    }

    fn validate_content(&self, content: &PublishContent) -> Result<()> {
        if content.media.is_empty() {
            return Err(PlatformError::Validation(
                "Instagram posts require an image or a video".to_string(),
            )
            .into());
        }

        let count = content.text.chars().count();
        if count > INSTAGRAM_CHARACTER_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Caption exceeds Instagram's {} character limit (current: {} characters)",
                INSTAGRAM_CHARACTER_LIMIT, count
            ))
            .into());
        }

        Ok(())
    }
}
