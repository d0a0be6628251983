//! Facebook Graph API pieces shared by the Facebook and Instagram adapters

use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::http::{
    degrade_insights, map_exchange_error, map_status_error, transport_error, OAuthTokenResponse,
};
use crate::config::OAuthSettings;
use crate::error::{PlatformError, Result};
use crate::types::{InsightMetrics, Platform, TokenGrant};
use secrecy::ExposeSecret;

pub(crate) const GRAPH_VERSION: &str = "v19.0";

/// Base URLs for the Graph API and the login dialog
#[derive(Debug, Clone)]
pub struct GraphEndpoints {
    pub graph_base: String,
    pub dialog_url: String,
}

impl Default for GraphEndpoints {
    fn default() -> Self {
        Self {
            graph_base: format!("https://graph.facebook.com/{}", GRAPH_VERSION),
            dialog_url: format!("https://www.facebook.com/{}/dialog/oauth", GRAPH_VERSION),
        }
    }
}

impl GraphEndpoints {
    /// Point both the API and the dialog at a single base, for tests
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            graph_base: base.to_string(),
            dialog_url: format!("{}/dialog/oauth", base),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.graph_base, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error_subcode: Option<i64>,
}

impl GraphErrorBody {
    /// "Object does not exist" or "Unsupported get request" on a vanished post
    pub fn is_missing_object(&self) -> bool {
        self.code == 100
            && (self.error_subcode == Some(33) || self.message.contains("does not exist"))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.code, 4 | 17 | 32 | 613)
    }

    pub fn is_expired_token(&self) -> bool {
        self.code == 190
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == 10 || (200..=299).contains(&self.code)
    }
}

pub(crate) fn parse_graph_error(body: &str) -> Option<GraphErrorBody> {
    serde_json::from_str::<GraphErrorEnvelope>(body)
        .ok()
        .map(|e| e.error)
}

/// Outcome of a Graph call that did not succeed
pub(crate) struct GraphFailure {
    pub error: PlatformError,
    pub not_found: bool,
}

/// Map a failed Graph response using its error code when present
pub(crate) fn map_graph_failure(
    platform: Platform,
    context: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> GraphFailure {
    let graph = parse_graph_error(body);
    let not_found = status == reqwest::StatusCode::NOT_FOUND
        || graph.as_ref().is_some_and(|g| g.is_missing_object());

    let error = match &graph {
        Some(g) if g.is_expired_token() => PlatformError::TokenExpired(format!(
            "{} session expired ({}): {}. Suggestion: reconnect the account.",
            platform, context, g.message
        )),
        Some(g) if g.is_rate_limited() => PlatformError::RateLimit(format!(
            "{} rate limit reached ({}): {}",
            platform, context, g.message
        )),
        Some(g) if g.is_permission_denied() => PlatformError::Authentication(format!(
            "{} permission missing ({}): {}. Suggestion: reconnect and grant all requested permissions.",
            platform, context, g.message
        )),
        _ => map_status_error(platform, context, status, body),
    };

    GraphFailure { error, not_found }
}

/// Decode a Graph response or map its error
pub(crate) async fn read_graph<T: DeserializeOwned>(
    platform: Platform,
    context: &str,
    response: Response,
) -> std::result::Result<T, GraphFailure> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_graph_failure(platform, context, status, &body));
    }
    response.json::<T>().await.map_err(|e| GraphFailure {
        error: transport_error(platform, context, e),
        not_found: false,
    })
}

/// Missing object → deleted, denied or throttled → degraded, anything else raised
pub(crate) fn insight_failure(
    platform: Platform,
    platform_post_id: &str,
    failure: GraphFailure,
) -> Result<InsightMetrics> {
    if failure.not_found {
        return Ok(InsightMetrics::deleted());
    }
    degrade_insights(platform, platform_post_id, failure.error)
}

/// Login dialog URL; Instagram uses the same dialog with its own scopes
pub(crate) fn dialog_url(
    endpoints: &GraphEndpoints,
    settings: &OAuthSettings,
    state: &str,
    scopes: &[&str],
) -> Result<Url> {
    let mut url = Url::parse(&endpoints.dialog_url).map_err(|e| {
        PlatformError::Authentication(format!("Invalid Facebook dialog URL: {}", e))
    })?;
    url.query_pairs_mut()
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("state", state)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(","));
    Ok(url)
}

/// Authorization-code exchange: a GET with the credentials in the query string
pub(crate) async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &GraphEndpoints,
    platform: Platform,
    settings: &OAuthSettings,
    code: &str,
) -> Result<TokenGrant> {
    let response = client
        .get(endpoints.url("oauth/access_token"))
        .query(&[
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.expose_secret()),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("code", code),
        ])
        .send()
        .await
        .map_err(|e| transport_error(platform, "token exchange", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_exchange_error(platform, status, &body).into());
    }

    let token: OAuthTokenResponse = response
        .json()
        .await
        .map_err(|e| transport_error(platform, "token exchange", e))?;
    Ok(token.into())
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphPage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Facebook Pages the user manages
pub(crate) async fn list_pages(
    client: &reqwest::Client,
    endpoints: &GraphEndpoints,
    platform: Platform,
    access_token: &str,
) -> Result<Vec<GraphPage>> {
    let context = "list pages";
    let response = client
        .get(endpoints.url("me/accounts"))
        .query(&[("fields", "id,name,access_token"), ("access_token", access_token)])
        .send()
        .await
        .map_err(|e| transport_error(platform, context, e))?;

    let pages: GraphList<GraphPage> = read_graph(platform, context, response)
        .await
        .map_err(|f| f.error)?;
    Ok(pages.data)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SummaryCount {
    #[serde(default)]
    pub summary: Option<TotalCount>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TotalCount {
    #[serde(default)]
    pub total_count: i64,
}

impl SummaryCount {
    pub fn total(&self) -> i64 {
        self.summary.as_ref().map(|s| s.total_count).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct InsightValue {
    pub name: String,
    #[serde(default)]
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetricValue {
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Sum of the first value of the named metric, 0 when absent
pub(crate) fn metric(insights: &[InsightValue], name: &str) -> i64 {
    insights
        .iter()
        .find(|i| i.name == name)
        .and_then(|i| i.values.first())
        .and_then(|v| v.value.as_i64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_graph_error() {
        let body = r#"{"error":{"message":"Unsupported get request.","type":"GraphMethodException","code":100,"error_subcode":33}}"#;
        let error = parse_graph_error(body).unwrap();
        assert!(error.is_missing_object());
        assert!(!error.is_rate_limited());
    }

    #[test]
    fn test_graph_failure_maps_codes() {
        let expired = map_graph_failure(
            Platform::Facebook,
            "insights",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Session has expired","code":190}}"#,
        );
        assert!(matches!(expired.error, PlatformError::TokenExpired(_)));

        let throttled = map_graph_failure(
            Platform::Instagram,
            "insights",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Application request limit reached","code":4}}"#,
        );
        assert!(matches!(throttled.error, PlatformError::RateLimit(_)));

        let denied = map_graph_failure(
            Platform::Instagram,
            "insights",
            reqwest::StatusCode::FORBIDDEN,
            r#"{"error":{"message":"Requires instagram_manage_insights","code":10}}"#,
        );
        assert!(matches!(denied.error, PlatformError::Authentication(_)));
        assert!(!denied.not_found);
    }

    #[test]
    fn test_insight_failure_for_vanished_post() {
        let failure = map_graph_failure(
            Platform::Facebook,
            "insights",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Object with ID '1_2' does not exist","code":100}}"#,
        );
        let metrics = insight_failure(Platform::Facebook, "1_2", failure).unwrap();
        assert!(metrics.is_deleted);
    }

    #[test]
    fn test_metric_lookup() {
        let insights: Vec<InsightValue> = serde_json::from_str(
            r#"[{"name":"reach","values":[{"value":12}]},{"name":"impressions","values":[{"value":30}]}]"#,
        )
        .unwrap();
        assert_eq!(metric(&insights, "reach"), 12);
        assert_eq!(metric(&insights, "impressions"), 30);
        assert_eq!(metric(&insights, "saved"), 0);
    }
}
