//! Error types for SocialSync

use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, SocialSyncError>;

#[derive(Error, Debug)]
pub enum SocialSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Identity provider error: {0}")]
    Identity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SocialSyncError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SocialSyncError::InvalidInput(_) => 3,
            SocialSyncError::Platform(
                PlatformError::Authentication(_)
                | PlatformError::TokenExpired(_)
                | PlatformError::InvalidGrant(_),
            ) => 2,
            SocialSyncError::Platform(_) => 1,
            SocialSyncError::Config(_) => 1,
            SocialSyncError::Database(_) => 1,
            SocialSyncError::Identity(_) => 1,
        }
    }

    /// The platform error wrapped by this error, if any
    pub fn as_platform(&self) -> Option<&PlatformError> {
        match self {
            SocialSyncError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Missing OAuth setting '{field}' for {platform}")]
    MissingOAuthSetting { platform: Platform, field: &'static str },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The authorization code was rejected (bad, reused or expired)
    #[error("Authorization grant rejected: {0}")]
    InvalidGrant(String),

    /// The stored token no longer works and the owner must reconnect
    #[error("Token expired, reconnect required: {0}")]
    TokenExpired(String),

    /// The credential exists but its business account was never resolved
    #[error("Account not resolved: {0}")]
    IdentityUnresolved(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    /// Transient errors are worth retrying at the next natural trigger.
    ///
    /// Rate limiting has no dedicated backoff and is treated as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_) | PlatformError::RateLimit(_))
    }

    /// Errors that should prompt the owner to reconnect the account
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            PlatformError::TokenExpired(_) | PlatformError::InvalidGrant(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SocialSyncError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_reconnect_errors() {
        let expired = SocialSyncError::Platform(PlatformError::TokenExpired("yt".to_string()));
        let grant = SocialSyncError::Platform(PlatformError::InvalidGrant("bad code".to_string()));
        let auth = SocialSyncError::Platform(PlatformError::Authentication("nope".to_string()));
        assert_eq!(expired.exit_code(), 2);
        assert_eq!(grant.exit_code(), 2);
        assert_eq!(auth.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let network = SocialSyncError::Platform(PlatformError::Network("503".to_string()));
        assert_eq!(network.exit_code(), 1);

        let config = SocialSyncError::Config(ConfigError::MissingField("app.base_url".to_string()));
        assert_eq!(config.exit_code(), 1);

        let identity = SocialSyncError::Identity("lookup failed".to_string());
        assert_eq!(identity.exit_code(), 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("timeout".to_string()).is_transient());
        assert!(PlatformError::RateLimit("429".to_string()).is_transient());
        assert!(!PlatformError::Validation("too long".to_string()).is_transient());
        assert!(!PlatformError::TokenExpired("401".to_string()).is_transient());
    }

    #[test]
    fn test_reconnect_classification() {
        assert!(PlatformError::TokenExpired("401".to_string()).requires_reconnect());
        assert!(PlatformError::InvalidGrant("used".to_string()).requires_reconnect());
        assert!(!PlatformError::Network("503".to_string()).requires_reconnect());
    }

    #[test]
    fn test_missing_oauth_setting_message() {
        let error = ConfigError::MissingOAuthSetting {
            platform: Platform::Pinterest,
            field: "client_secret",
        };
        assert_eq!(
            error.to_string(),
            "Missing OAuth setting 'client_secret' for PINTEREST"
        );
    }

    #[test]
    fn test_error_message_formatting_platform() {
        let error: SocialSyncError = PlatformError::Posting("upload rejected".to_string()).into();
        assert_eq!(
            error.to_string(),
            "Platform error: Posting failed: upload rejected"
        );
        assert!(error.as_platform().is_some());
    }
}
