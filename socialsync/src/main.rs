//! socialsync - connect social accounts, publish, and read engagement metrics

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use libsocialsync::config::Config;
use libsocialsync::logging::{LogFormat, LoggingConfig};
use libsocialsync::service::SocialSyncService;
use libsocialsync::{MediaItem, Platform, PublishContent, SocialSyncError};
use serde_json::json;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "socialsync")]
#[command(version, about = "Connect social accounts, publish content and sync engagement metrics")]
#[command(long_about = r#"Connect Facebook, Instagram, LinkedIn, YouTube and Pinterest accounts,
publish to several of them at once and read cached engagement metrics.

EXAMPLES:
    # Print the authorization URL for an owner
    socialsync connect facebook --owner 42

    # Complete the OAuth redirect
    socialsync callback --code abc --state FACEBOOK_42

    # Publish to two platforms
    socialsync publish --owner 42 --platform facebook,linkedin "Spring launch"
    echo "Spring launch" | socialsync publish --owner 42 --platform linkedin --media https://cdn.example.com/a.jpg

    # Read metrics (cached for one hour unless --force)
    socialsync insights --platform youtube dQw4w9WgXcQ --format json

EXIT CODES:
    0 - Success (including partial publish success)
    1 - Failure (every platform failed, callback redirected with an error, platform or storage error)
    2 - Reconnect required (authentication failed or token expired)
    3 - Invalid input
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the XDG config location)
    #[arg(long, global = true, env = "SOCIALSYNC_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log format on stderr (text, json, pretty)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the authorization URL for connecting a platform
    Connect {
        platform: Platform,

        #[arg(long)]
        owner: String,
    },

    /// Complete an OAuth redirect and print where it sends the owner
    Callback {
        #[arg(long)]
        code: Option<String>,

        #[arg(long)]
        state: Option<String>,
    },

    /// Publish content to one or more platforms
    Publish {
        /// Post text (reads from stdin if not provided)
        text: Option<String>,

        #[arg(long)]
        owner: String,

        /// Target platforms (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        platform: Vec<Platform>,

        /// Media URL to attach; videos are recognized by extension
        #[arg(short, long)]
        media: Vec<String>,

        /// Title for YouTube videos and Pinterest pins
        #[arg(long)]
        title: Option<String>,

        /// Pinterest board id
        #[arg(long)]
        board: Option<String>,
    },

    /// Show engagement metrics for one or more posts
    Insights {
        #[arg(short, long)]
        platform: Platform,

        #[arg(required = true)]
        post_ids: Vec<String>,

        /// Owner whose credential reads posts not published through socialsync
        #[arg(long)]
        owner: Option<String>,

        /// Fetch live even if the cached metrics are fresh
        #[arg(long)]
        force: bool,
    },

    /// Show which platforms an owner has connected
    Status {
        #[arg(long)]
        owner: String,
    },

    /// Refresh an owner's refreshable tokens
    Refresh {
        #[arg(long)]
        owner: String,

        /// Refresh even tokens that are not about to expire
        #[arg(long)]
        force: bool,
    },

    /// Remove the stored credential for a platform
    Disconnect {
        platform: Platform,

        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    LoggingConfig::new(cli.log_format, level.to_string(), cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<SocialSyncError>()
        .map(SocialSyncError::exit_code)
        .unwrap_or(1)
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    debug!(database = %config.database.path, "Configuration loaded");
    let service = SocialSyncService::from_config(config).await?;
    let format = cli.format;

    match cli.command {
        Commands::Connect { platform, owner } => {
            let url = service.connect(platform, &owner).await?;
            match format {
                OutputFormat::Text => println!("{}", url),
                OutputFormat::Json => print_json(&json!({ "platform": platform, "url": url.as_str() }))?,
            }
            Ok(0)
        }

        Commands::Callback { code, state } => {
            let redirect = service
                .handle_callback(code.as_deref(), state.as_deref())
                .await;
            match format {
                OutputFormat::Text => println!("{}", redirect.location),
                OutputFormat::Json => print_json(&json!({
                    "location": redirect.location,
                    "success": redirect.is_success(),
                    "error": redirect.error,
                }))?,
            }
            Ok(if redirect.is_success() { 0 } else { 1 })
        }

        Commands::Publish {
            text,
            owner,
            platform,
            media,
            title,
            board,
        } => {
            let content = PublishContent {
                text: read_text(text)?,
                media: media.into_iter().map(MediaItem::from_url).collect(),
                title,
                board_id: board,
            };
            let outcomes = service.publish(&owner, &platform, &content).await?;

            match format {
                OutputFormat::Text => {
                    for outcome in &outcomes {
                        match (&outcome.platform_post_id, &outcome.error) {
                            (Some(post_id), _) => println!("{}: {}", outcome.platform, post_id),
                            (None, Some(error)) => println!("{}: failed: {}", outcome.platform, error),
                            (None, None) => println!("{}: failed", outcome.platform),
                        }
                    }
                }
                OutputFormat::Json => print_json(&outcomes)?,
            }
            Ok(if outcomes.iter().any(|o| o.success) { 0 } else { 1 })
        }

        Commands::Insights {
            platform,
            post_ids,
            owner,
            force,
        } => {
            // A single post surfaces storage errors; a batch never fails
            let snapshots = if let Some(owner) = owner.as_deref() {
                let mut snapshots = Vec::with_capacity(post_ids.len());
                for post_id in &post_ids {
                    snapshots.push(service.get_owner_insights(owner, post_id, platform, force).await?);
                }
                snapshots
            } else if post_ids.len() == 1 {
                vec![service.get_insights(&post_ids[0], platform, force).await?]
            } else {
                let posts: Vec<(String, Platform)> =
                    post_ids.into_iter().map(|id| (id, platform)).collect();
                service.get_insights_batch(&posts, force).await
            };

            match format {
                OutputFormat::Text => {
                    for s in &snapshots {
                        let deleted = if s.is_deleted { " (deleted)" } else { "" };
                        println!(
                            "{}{}: {} likes, {} comments, reach {}, {} impressions, {:.2}% engagement",
                            s.platform_post_id, deleted, s.likes, s.comments, s.reach, s.impressions, s.engagement_rate
                        );
                    }
                }
                OutputFormat::Json => print_json(&snapshots)?,
            }
            Ok(0)
        }

        Commands::Status { owner } => {
            let statuses = service.get_connection_status(&owner).await?;
            match format {
                OutputFormat::Text => {
                    for status in &statuses {
                        let state = match (status.connected, &status.display_name) {
                            (true, Some(name)) => format!("connected as {}", name),
                            (true, None) => "connected (details unavailable)".to_string(),
                            (false, _) => "not connected".to_string(),
                        };
                        println!("{}: {}", status.platform, state);
                    }
                }
                OutputFormat::Json => print_json(&statuses)?,
            }
            Ok(0)
        }

        Commands::Refresh { owner, force } => {
            let outcomes = service.refresh_owner_tokens(&owner, force).await?;
            match format {
                OutputFormat::Text => {
                    for (platform, outcome) in &outcomes {
                        println!("{}: {}", platform, outcome);
                    }
                }
                OutputFormat::Json => {
                    let rows: Vec<_> = outcomes
                        .iter()
                        .map(|(platform, outcome)| json!({ "platform": platform, "result": outcome }))
                        .collect();
                    print_json(&rows)?
                }
            }
            Ok(0)
        }

        Commands::Disconnect { platform, owner } => {
            let removed = service.disconnect(&owner, platform).await?;
            match format {
                OutputFormat::Text if removed => println!("Disconnected {}", platform),
                OutputFormat::Text => println!("{} was not connected", platform),
                OutputFormat::Json => print_json(&json!({ "platform": platform, "removed": removed }))?,
            }
            Ok(0)
        }
    }
}

/// Post text from the argument, or from stdin when piped
fn read_text(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if std::io::stdin().is_terminal() {
        bail!(SocialSyncError::InvalidInput(
            "No content provided; pass it as an argument or pipe it on stdin".to_string()
        ));
    }

    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read content from stdin")?;
    Ok(buffer.trim_end().to_string())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
