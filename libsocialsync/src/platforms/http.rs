//! HTTP plumbing shared by the platform adapters
//!
//! Maps transport failures and HTTP status codes onto `PlatformError` with the
//! platform and operation in the message, the same way for every adapter.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::warn;

use crate::error::{PlatformError, Result};
use crate::types::{InsightMetrics, Platform, TokenGrant};

const BODY_EXCERPT_LEN: usize = 300;

/// Largest media file streamed to a platform unless configured otherwise
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Build the shared HTTP client used by all adapters
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("socialsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)).into())
}

/// Map a reqwest transport error (no HTTP status) to a platform error
///
/// The request URL is stripped first: Graph API calls carry client secrets,
/// codes and tokens in the query string.
pub(crate) fn transport_error(platform: Platform, context: &str, error: reqwest::Error) -> PlatformError {
    let error = error.without_url();
    if error.is_timeout() {
        PlatformError::Network(format!("{} request timed out ({}): {}", platform, context, error))
    } else if error.is_decode() {
        PlatformError::Posting(format!(
            "{} returned an unexpected response ({}): {}",
            platform, context, error
        ))
    } else {
        PlatformError::Network(format!(
            "Network error while contacting {} ({}): {}. Check your internet connection.",
            platform, context, error
        ))
    }
}

/// Map a non-success HTTP status to a platform error
///
/// - 401 → `TokenExpired` (the owner must reconnect)
/// - 403 → `Authentication` (missing permission)
/// - 400/422 → `Validation`
/// - 429 → `RateLimit`
/// - 5xx → `Network`
/// - anything else → `Posting`
pub(crate) fn map_status_error(
    platform: Platform,
    context: &str,
    status: StatusCode,
    body: &str,
) -> PlatformError {
    let body = excerpt(body);
    match status.as_u16() {
        401 => PlatformError::TokenExpired(format!(
            "{} rejected the access token ({}): {}. Suggestion: reconnect the account.",
            platform, context, body
        )),
        403 => PlatformError::Authentication(format!(
            "{} denied access ({}): {}. Suggestion: check the granted permissions.",
            platform, context, body
        )),
        400 | 422 => PlatformError::Validation(format!(
            "{} rejected the request ({}): {}",
            platform, context, body
        )),
        429 => PlatformError::RateLimit(format!(
            "{} rate limit exceeded ({}): {}",
            platform, context, body
        )),
        500..=599 => PlatformError::Network(format!(
            "{} server error {} ({}): {}",
            platform, status, context, body
        )),
        _ => PlatformError::Posting(format!(
            "{} returned HTTP {} ({}): {}",
            platform, status, context, body
        )),
    }
}

/// Map a failed authorization-code exchange.
///
/// 5xx stays transient; anything the server answered with a 4xx is a
/// rejected grant the user has to retry from the start.
pub(crate) fn map_exchange_error(platform: Platform, status: StatusCode, body: &str) -> PlatformError {
    if status.is_server_error() {
        return PlatformError::Network(format!(
            "{} token endpoint unavailable ({}): {}",
            platform,
            status,
            excerpt(body)
        ));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return PlatformError::RateLimit(format!(
            "{} token endpoint rate limited: {}",
            platform,
            excerpt(body)
        ));
    }
    PlatformError::InvalidGrant(format!(
        "{} rejected the authorization code ({}): {}. Suggestion: start the connection again.",
        platform,
        status,
        excerpt(body)
    ))
}

/// Return the response when successful, otherwise the mapped status error
pub(crate) async fn check(platform: Platform, context: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status_error(platform, context, status, &body).into())
}

/// Decode a successful JSON response, mapping failures
pub(crate) async fn read_json<T: DeserializeOwned>(
    platform: Platform,
    context: &str,
    response: Response,
) -> Result<T> {
    let response = check(platform, context, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| transport_error(platform, context, e).into())
}

/// Fold a failed insight fetch into a result.
///
/// Denied and throttled requests become [`InsightMetrics::degraded`] so one
/// platform's permission problem never surfaces as an error; anything else
/// (5xx, timeouts, malformed bodies) is raised.
pub(crate) fn degrade_insights(
    platform: Platform,
    platform_post_id: &str,
    error: PlatformError,
) -> Result<InsightMetrics> {
    match error {
        PlatformError::TokenExpired(_)
        | PlatformError::Authentication(_)
        | PlatformError::RateLimit(_) => {
            warn!(
                platform = %platform,
                platform_post_id,
                error = %error,
                "Insight fetch denied or throttled, returning zeroed metrics"
            );
            Ok(InsightMetrics::degraded())
        }
        other => Err(other.into()),
    }
}

/// Decode an insight response.
///
/// `Break` carries the final metrics when the post is gone (404) or the
/// request was denied; `Continue` carries the decoded body.
pub(crate) async fn read_insight_json<T: DeserializeOwned>(
    platform: Platform,
    platform_post_id: &str,
    context: &str,
    response: Response,
) -> Result<ControlFlow<InsightMetrics, T>> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(ControlFlow::Break(InsightMetrics::deleted()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let error = map_status_error(platform, context, status, &body);
        return degrade_insights(platform, platform_post_id, error).map(ControlFlow::Break);
    }
    let body = response
        .json::<T>()
        .await
        .map_err(|e| transport_error(platform, context, e))?;
    Ok(ControlFlow::Continue(body))
}

/// Standard OAuth2 token response body
#[derive(Debug, Deserialize)]
pub(crate) struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl From<OAuthTokenResponse> for TokenGrant {
    fn from(response: OAuthTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_in_seconds: response.expires_in,
        }
    }
}

/// Decode a token endpoint response, mapping failures with `map_exchange_error`
pub(crate) async fn read_token_response(platform: Platform, response: Response) -> Result<TokenGrant> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_exchange_error(platform, status, &body).into());
    }
    let token: OAuthTokenResponse = response
        .json()
        .await
        .map_err(|e| transport_error(platform, "token exchange", e))?;
    if token.access_token.is_empty() {
        return Err(PlatformError::InvalidGrant(format!(
            "{} returned an empty access token",
            platform
        ))
        .into());
    }
    Ok(token.into())
}

/// Remote media streamed through to a platform upload URL
pub(crate) struct FetchedMedia {
    pub body: reqwest::Body,
    pub length: u64,
    pub content_type: String,
}

/// Open a media download so its bytes can be streamed to a platform
///
/// The source must announce its size; media larger than `max_bytes` is
/// rejected before any upload session is opened.
pub(crate) async fn fetch_media(
    client: &reqwest::Client,
    platform: Platform,
    url: &str,
    max_bytes: u64,
) -> Result<FetchedMedia> {
    let context = "fetch media";
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(platform, context, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PlatformError::Posting(format!(
            "Could not download media {} for {} (HTTP {})",
            url, platform, status
        ))
        .into());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let length = response.content_length().ok_or_else(|| {
        PlatformError::Validation(format!(
            "Media {} for {} has no Content-Length; its size must be known before upload",
            url, platform
        ))
    })?;
    if length > max_bytes {
        return Err(PlatformError::Validation(format!(
            "Media {} for {} is {} bytes, above the {} byte limit",
            url, platform, length, max_bytes
        ))
        .into());
    }

    Ok(FetchedMedia {
        body: reqwest::Body::wrap_stream(response.bytes_stream()),
        length,
        content_type,
    })
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(BODY_EXCERPT_LEN).collect();
        format!("{}...", cut)
    }
}
