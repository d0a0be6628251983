//! Facebook Pages adapter
//!
//! Posts go to the first Facebook Page the user manages. The page's own
//! token is stored next to the user token and used for every page call.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::graph::{self, read_graph, GraphEndpoints, GraphList, InsightValue, SummaryCount};
use super::http::transport_error;
use super::PlatformAdapter;
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{
    AccountIdentity, InsightMetrics, Platform, PlatformCredential, PublishContent,
    ResolvedIdentity, TokenGrant,
};

const FACEBOOK_CHARACTER_LIMIT: usize = 63_206;

const SCOPES: &[&str] = &[
    "pages_show_list",
    "pages_manage_posts",
    "pages_read_engagement",
    "read_insights",
];

pub struct FacebookAdapter {
    client: reqwest::Client,
    endpoints: GraphEndpoints,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
    /// Photos answer with the photo id plus the feed post id
    #[serde(default)]
    post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostEngagement {
    #[serde(default)]
    likes: SummaryCount,
    #[serde(default)]
    comments: SummaryCount,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    #[serde(default)]
    name: Option<String>,
}

impl FacebookAdapter {
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

    /// Page id and page token, or a validation error when no page was found at connect time
    fn page<'a>(&self, credential: &'a PlatformCredential) -> Result<(&'a str, &'a str)> {
        let page_id = credential.account.require(Platform::Facebook)?;
        let token = credential.page_access_token.as_deref().ok_or_else(|| {
            PlatformError::Validation(
                "No Facebook Page is connected to this account. Create a Page and reconnect."
                    .to_string(),
            )
        })?;
        Ok((page_id, token))
    }

    async fn post_form(&self, path: &str, context: &str, form: &[(&str, &str)]) -> Result<CreatedObject> {
        let response = self
            .client
            .post(self.endpoints.url(path))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Facebook, context, e))?;

        let created: CreatedObject = read_graph(Platform::Facebook, context, response)
            .await
            .map_err(|f| f.error)?;
        Ok(created)
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn authorization_url(&self, settings: &OAuthSettings, state: &str) -> Result<Url> {
        graph::dialog_url(&self.endpoints, settings, state, SCOPES)
    }

    async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<TokenGrant> {
        graph::exchange_code(&self.client, &self.endpoints, Platform::Facebook, settings, code).await
    }

    async fn resolve_identity(&self, access_token: &str) -> Result<ResolvedIdentity> {
        let pages =
            graph::list_pages(&self.client, &self.endpoints, Platform::Facebook, access_token).await?;

        if let Some(page) = pages.into_iter().next() {
            debug!(page_id = %page.id, "Resolved Facebook Page");
            return Ok(ResolvedIdentity {
                account: AccountIdentity::Resolved(page.id),
                display_name: page.name,
                page_access_token: page.access_token,
            });
        }

        // No page: keep the user id so the connection shows up, publishing will refuse
        let context = "resolve user";
        let response = self
            .client
            .get(self.endpoints.url("me"))
            .query(&[("fields", "id,name"), ("access_token", access_token)])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Facebook, context, e))?;
        let user: GraphUser = read_graph(Platform::Facebook, context, response)
            .await
            .map_err(|f| f.error)?;

        warn!(user_id = %user.id, "Facebook user manages no Pages");
        Ok(ResolvedIdentity::resolved(user.id, user.name))
    }

    async fn publish(&self, credential: &PlatformCredential, content: &PublishContent) -> Result<String> {
        self.validate_content(content)?;
        let (page_id, token) = self.page(credential)?;

        if let Some(video) = content.videos().next() {
            let created = self
                .post_form(
                    &format!("{}/videos", page_id),
                    "publish video",
                    &[
                        ("file_url", video.url.as_str()),
                        ("description", content.text.as_str()),
                        ("access_token", token),
                    ],
                )
                .await?;
            return Ok(created.id);
        }

        let mut images = content.images();
        if let Some(image) = images.next() {
            let dropped = images.count();
            if dropped > 0 {
                warn!(dropped, "Facebook photo posts carry one image, extra images dropped");
            }
            let created = self
                .post_form(
                    &format!("{}/photos", page_id),
                    "publish photo",
                    &[
                        ("url", image.url.as_str()),
                        ("caption", content.text.as_str()),
                        ("access_token", token),
                    ],
                )
                .await?;
            return Ok(created.post_id.unwrap_or(created.id));
        }

        let created = self
            .post_form(
                &format!("{}/feed", page_id),
                "publish post",
                &[("message", content.text.as_str()), ("access_token", token)],
            )
            .await?;
        Ok(created.id)
    }

    async fn fetch_insights(
        &self,
        credential: &PlatformCredential,
        platform_post_id: &str,
    ) -> Result<InsightMetrics> {
        let platform = Platform::Facebook;
        let token = credential.acting_token();

        let context = "fetch engagement";
        let response = self
            .client
            .get(self.endpoints.url(platform_post_id))
            .query(&[
                (
                    "fields",
                    "likes.summary(true).limit(0),comments.summary(true).limit(0)",
                ),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        let engagement: PostEngagement = match read_graph(platform, context, response).await {
            Ok(engagement) => engagement,
            Err(failure) => return graph::insight_failure(platform, platform_post_id, failure),
        };

        let context = "fetch post insights";
        let response = self
            .client
            .get(self.endpoints.url(&format!("{}/insights", platform_post_id)))
            .query(&[
                ("metric", "post_impressions,post_impressions_unique"),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(platform, context, e))?;
        let insights: GraphList<InsightValue> = match read_graph(platform, context, response).await {
            Ok(insights) => insights,
            Err(failure) => return graph::insight_failure(platform, platform_post_id, failure),
        };

        Ok(InsightMetrics::new(
            engagement.likes.total(),
            engagement.comments.total(),
            graph::metric(&insights.data, "post_impressions_unique"),
            graph::metric(&insights.data, "post_impressions"),
        ))
    }

    async fn display_name(&self, credential: &PlatformCredential) -> Result<Option<String>> {
        let context = "connection status";
        let target = credential.account.account_id().unwrap_or("me");
        let response = self
            .client
            .get(self.endpoints.url(target))
            .query(&[("fields", "name"), ("access_token", credential.acting_token())])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Facebook, context, e))?;
        let named: NamedObject = read_graph(Platform::Facebook, context, response)
            .await
            .map_err(|f| f.error)?;
        Ok(named.name)
    }

    fn character_limit(&self) -> Option<usize> {
        Some(FACEBOOK_CHARACTER_LIMIT)
    }
}
