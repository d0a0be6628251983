//! Identity provider lookups
//!
//! The identity provider is the source of truth for owners. When an OAuth
//! callback arrives for an owner that has no local row yet, the owner is
//! looked up here and materialized locally.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::IdentityConfig;
use crate::error::{Result, SocialSyncError};
use crate::types::OwnerProfile;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up an owner by its opaque id. `Ok(None)` means the owner does not exist.
    async fn lookup(&self, owner_id: &str) -> Result<Option<OwnerProfile>>;
}

/// Identity provider backed by a REST user directory
///
/// Issues `GET {endpoint}/users/{id}` with an optional bearer secret; a 404
/// means the owner does not exist.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    endpoint: String,
    secret_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    id: String,
    #[serde(default)]
    primary_email: Option<String>,
    #[serde(default)]
    email_addresses: Vec<DirectoryEmail>,
    #[serde(default, alias = "first_name")]
    given_name: Option<String>,
    #[serde(default, alias = "last_name")]
    family_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryEmail {
    email_address: String,
}

impl HttpIdentityProvider {
    pub fn new(client: reqwest::Client, config: &IdentityConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn lookup(&self, owner_id: &str) -> Result<Option<OwnerProfile>> {
        let url = format!("{}/users/{}", self.endpoint, owner_id);
        debug!(owner_id, "Looking up owner in identity provider");

        let mut request = self.client.get(&url);
        if let Some(secret) = &self.secret_key {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SocialSyncError::Identity(format!("lookup request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SocialSyncError::Identity(format!(
                "lookup for {} returned HTTP {}",
                owner_id, status
            )));
        }

        let user: DirectoryUser = response
            .json()
            .await
            .map_err(|e| SocialSyncError::Identity(format!("invalid lookup response: {}", e)))?;

        let primary_email = user
            .primary_email
            .or_else(|| user.email_addresses.into_iter().next().map(|e| e.email_address));

        Ok(Some(OwnerProfile {
            id: user.id,
            primary_email,
            given_name: user.given_name,
            family_name: user.family_name,
        }))
    }
}

/// In-memory identity provider for tests and offline use
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    users: Arc<Mutex<HashMap<String, OwnerProfile>>>,
    lookups: Arc<Mutex<usize>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, profile: OwnerProfile) -> Self {
        self.insert(profile);
        self
    }

    pub fn insert(&self, profile: OwnerProfile) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(profile.id.clone(), profile);
        }
    }

    /// Number of lookups served so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn lookup(&self, owner_id: &str) -> Result<Option<OwnerProfile>> {
        if let Ok(mut n) = self.lookups.lock() {
            *n += 1;
        }
        let users = self
            .users
            .lock()
            .map_err(|_| SocialSyncError::Identity("identity table poisoned".to_string()))?;
        Ok(users.get(owner_id).cloned())
    }
}
