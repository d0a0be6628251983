//! Configuration management for SocialSync
//!
//! Configuration is a TOML file holding the database location, the app URL the
//! OAuth callback redirects back to, HTTP timeouts, the identity provider and
//! the admin-configured OAuth application for each platform.
//!
//! ```toml
//! [database]
//! path = "~/.local/share/socialsync/socialsync.db"
//!
//! [app]
//! base_url = "https://app.example.com"
//!
//! [oauth.facebook]
//! client_id = "1234"
//! client_secret = "shh"
//! redirect_uri = "https://app.example.com/oauth/callback"
//! ```

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub app: AppConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
    /// OAuth applications keyed by lower-case platform name
    #[serde(default)]
    pub oauth: BTreeMap<String, OAuthAppConfig>,
    #[serde(default)]
    pub pinterest: PinterestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the web app; callbacks redirect to `{base_url}/settings`
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for best-effort profile calls behind connection status
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    /// Largest media file streamed to YouTube or LinkedIn
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            max_media_bytes: default_max_media_bytes(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_status_timeout_secs() -> u64 {
    5
}

fn default_max_media_bytes() -> u64 {
    crate::platforms::http::DEFAULT_MAX_MEDIA_BYTES
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub endpoint: String,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Raw OAuth application settings as written by an admin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinterestConfig {
    #[serde(default)]
    pub default_board_id: Option<String>,
}

/// Complete OAuth settings for one platform, resolved once per operation
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub platform: Platform,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

impl OAuthSettings {
    pub fn new(
        platform: Platform,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            redirect_uri: redirect_uri.into(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        if config.app.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("app.base_url".to_string()).into());
        }
        Ok(config)
    }

    /// Create a default configuration with no platforms configured
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/socialsync/socialsync.db".to_string(),
            },
            app: AppConfig {
                base_url: "http://localhost:3000".to_string(),
            },
            http: HttpConfig::default(),
            identity: None,
            oauth: BTreeMap::new(),
            pinterest: PinterestConfig::default(),
        }
    }

    /// Resolve the OAuth settings for a platform
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingOAuthSetting` naming the first absent or
    /// blank value. A missing value is fatal for every flow of that platform.
    pub fn oauth_settings(&self, platform: Platform) -> std::result::Result<OAuthSettings, ConfigError> {
        let missing = |field| ConfigError::MissingOAuthSetting { platform, field };
        let app = self
            .oauth
            .get(platform.config_key())
            .ok_or_else(|| missing("client_id"))?;

        let client_id = non_blank(&app.client_id).ok_or_else(|| missing("client_id"))?;
        let client_secret = non_blank(&app.client_secret).ok_or_else(|| missing("client_secret"))?;
        let redirect_uri = non_blank(&app.redirect_uri).ok_or_else(|| missing("redirect_uri"))?;

        Ok(OAuthSettings::new(platform, client_id, client_secret, redirect_uri))
    }

    /// Settings page the OAuth callback redirects to
    pub fn settings_url(&self) -> String {
        format!("{}/settings", self.app.base_url.trim_end_matches('/'))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SOCIALSYNC_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("socialsync").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("socialsync"))
}
