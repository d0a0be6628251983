//! SocialSync - social account integration and analytics sync
//!
//! This library connects an organisation's Facebook, Instagram, LinkedIn,
//! YouTube and Pinterest accounts over OAuth, publishes content through each
//! platform's own primitive and keeps a cache of per-post engagement metrics.

pub mod audit;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod identity;
pub mod logging;
pub mod platforms;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::CredentialStore;
pub use db::Database;
pub use error::{PlatformError, Result, SocialSyncError};
pub use service::SocialSyncService;
pub use types::{
    AccountIdentity, ConnectionStatus, InsightSnapshot, MediaItem, Platform, PlatformCredential,
    PublishContent,
};
