//! OAuth connect and callback handling
//!
//! `connect` hands out the platform's authorization URL with a state token of
//! the form `<PLATFORM>_<ownerId>`. `handle` is the terminal leg of the
//! redirect: it validates the parameters and the state, makes sure the owner
//! exists locally, exchanges the code, discovers the account and stores the
//! credential. Every outcome is a redirect to the settings page carrying
//! either `success=connected` or `error=<reason>`.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::clock::Clock;
use crate::audit::{AuditAction, AuditLog};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{ConfigError, Result, SocialSyncError};
use crate::identity::IdentityProvider;
use crate::platforms::AdapterRegistry;
use crate::types::{Platform, PlatformCredential};

/// Where a callback currently is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStage {
    AwaitingCode,
    ExchangingToken,
    ResolvingIdentity,
    Persisted,
}

impl fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallbackStage::AwaitingCode => "awaiting_code",
            CallbackStage::ExchangingToken => "exchanging_token",
            CallbackStage::ResolvingIdentity => "resolving_identity",
            CallbackStage::Persisted => "persisted",
        })
    }
}

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Callback is missing the code or state parameter")]
    MissingParams,

    #[error("Invalid state token: {0}")]
    InvalidState(String),

    #[error("Owner {0} does not exist")]
    UserNotFound(String),

    #[error("Could not create local owner {owner_id}: {reason}")]
    UserCreationFailed { owner_id: String, reason: String },

    #[error(transparent)]
    ConfigMissing(#[from] ConfigError),

    #[error("Connection failed while {stage}: {source}")]
    ConnectionFailed {
        stage: CallbackStage,
        #[source]
        source: SocialSyncError,
    },
}

impl CallbackError {
    /// Error code carried in the redirect
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::MissingParams => "missing_params",
            CallbackError::InvalidState(_) => "invalid_state",
            CallbackError::UserNotFound(_) => "user_not_found",
            CallbackError::UserCreationFailed { .. } => "user_creation_failed",
            CallbackError::ConfigMissing(_) => "config_missing",
            CallbackError::ConnectionFailed { .. } => "connection_failed",
        }
    }

    pub fn stage(&self) -> CallbackStage {
        match self {
            CallbackError::ConnectionFailed { stage, .. } => *stage,
            _ => CallbackStage::AwaitingCode,
        }
    }
}

/// Redirect issued at the end of a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub error: Option<&'static str>,
}

impl Redirect {
    fn connected(config: &Config) -> Self {
        Self {
            location: format!("{}?success=connected", config.settings_url()),
            error: None,
        }
    }

    fn failed(config: &Config, reason: &'static str) -> Self {
        Self {
            location: format!("{}?error={}", config.settings_url(), reason),
            error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// State token sent through the authorization redirect
pub fn state_token(platform: Platform, owner_id: &str) -> String {
    format!("{}_{}", platform.as_str(), owner_id)
}

/// Split a state token into platform and owner id.
///
/// The platform token must be one of the upper-case platform names exactly;
/// the owner id is everything after the first underscore and may itself
/// contain underscores.
pub fn parse_state(state: &str) -> std::result::Result<(Platform, String), CallbackError> {
    let (token, owner_id) = state
        .split_once('_')
        .ok_or_else(|| CallbackError::InvalidState(format!("'{}' has no owner part", state)))?;

    let platform = Platform::ALL
        .into_iter()
        .find(|p| p.as_str() == token)
        .ok_or_else(|| CallbackError::InvalidState(format!("unknown platform '{}'", token)))?;

    if owner_id.trim().is_empty() {
        return Err(CallbackError::InvalidState("empty owner id".to_string()));
    }

    Ok((platform, owner_id.to_string()))
}

fn failed(stage: CallbackStage) -> impl FnOnce(SocialSyncError) -> CallbackError {
    move |source| CallbackError::ConnectionFailed { stage, source }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct CallbackHandler {
    config: Arc<Config>,
    registry: AdapterRegistry,
    db: Database,
    credentials: CredentialStore,
    identity: Arc<dyn IdentityProvider>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl CallbackHandler {
    pub fn new(
        config: Arc<Config>,
        registry: AdapterRegistry,
        db: Database,
        credentials: CredentialStore,
        identity: Arc<dyn IdentityProvider>,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            db,
            credentials,
            identity,
            audit,
            clock,
        }
    }

    /// Authorization URL the owner must visit to connect `platform`
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingOAuthSetting` when the platform's OAuth app is not
    /// fully configured, `SocialSyncError::InvalidInput` for an empty owner id.
    pub async fn connect(&self, platform: Platform, owner_id: &str) -> Result<Url> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(SocialSyncError::InvalidInput("Owner id cannot be empty".to_string()));
        }

        let settings = self.config.oauth_settings(platform)?;
        let adapter = self.registry.require(platform)?;
        let url = adapter.authorization_url(&settings, &state_token(platform, owner_id))?;

        self.audit
            .record(Some(owner_id), Some(platform), AuditAction::Connect, "started", None)
            .await;
        Ok(url)
    }

    /// Complete an authorization redirect
    pub async fn handle(&self, code: Option<&str>, state: Option<&str>) -> Redirect {
        let (Some(code), Some(state)) = (present(code), present(state)) else {
            return self.fail(None, CallbackError::MissingParams).await;
        };

        let (platform, owner_id) = match parse_state(state) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(None, e).await,
        };

        match self.complete(platform, &owner_id, code).await {
            Ok(credential) => {
                info!(
                    owner_id = %owner_id,
                    platform = %platform,
                    resolved = credential.account.is_resolved(),
                    "Platform connected"
                );
                self.audit
                    .record(
                        Some(&owner_id),
                        Some(platform),
                        AuditAction::Callback,
                        "connected",
                        Some(json!({
                            "account": credential.account,
                            "display_name": credential.display_name,
                        })),
                    )
                    .await;
                Redirect::connected(&self.config)
            }
            Err(e) => self.fail(Some((platform, &owner_id)), e).await,
        }
    }

    async fn complete(
        &self,
        platform: Platform,
        owner_id: &str,
        code: &str,
    ) -> std::result::Result<PlatformCredential, CallbackError> {
        let settings = self.config.oauth_settings(platform)?;
        self.ensure_owner(owner_id).await?;

        let adapter = self
            .registry
            .require(platform)
            .map_err(failed(CallbackStage::ExchangingToken))?;

        debug!(owner_id = %owner_id, platform = %platform, "Exchanging authorization code");
        let grant = adapter
            .exchange_code(&settings, code)
            .await
            .map_err(failed(CallbackStage::ExchangingToken))?;

        let identity = adapter
            .resolve_identity(&grant.access_token)
            .await
            .map_err(failed(CallbackStage::ResolvingIdentity))?;
        if !identity.account.is_resolved() {
            warn!(
                owner_id = %owner_id,
                platform = %platform,
                account = ?identity.account,
                "Storing credential without a resolved account"
            );
        }

        let credential =
            PlatformCredential::from_grant(owner_id, platform, grant, identity, self.clock.now());
        self.credentials
            .save(&credential)
            .await
            .map_err(failed(CallbackStage::Persisted))?;
        Ok(credential)
    }

    /// Make sure a local owner row exists, materializing it from the
    /// identity provider on first contact
    async fn ensure_owner(&self, owner_id: &str) -> std::result::Result<(), CallbackError> {
        let creation_failed = |reason: String| CallbackError::UserCreationFailed {
            owner_id: owner_id.to_string(),
            reason,
        };

        if self
            .db
            .get_owner(owner_id)
            .await
            .map_err(|e| creation_failed(e.to_string()))?
            .is_some()
        {
            return Ok(());
        }

        let profile = match self.identity.lookup(owner_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return Err(CallbackError::UserNotFound(owner_id.to_string())),
            Err(e) => return Err(creation_failed(e.to_string())),
        };

        info!(owner_id = %owner_id, "Materializing owner from identity provider");
        self.db
            .create_owner(&profile, self.clock.now())
            .await
            .map_err(|e| creation_failed(e.to_string()))
    }

    async fn fail(&self, context: Option<(Platform, &str)>, error: CallbackError) -> Redirect {
        let reason = error.reason();
        warn!(reason, stage = %error.stage(), "OAuth callback failed: {}", error);
        self.audit
            .record(
                context.map(|(_, owner)| owner),
                context.map(|(platform, _)| platform),
                AuditAction::Callback,
                "failed",
                Some(json!({ "reason": reason, "error": error.to_string() })),
            )
            .await;
        Redirect::failed(&self.config, reason)
    }
}
