use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::middleware::auth::issue_token;
use crate::AppState;

#[derive(Parser)]
#[command(name = "kilofly-core")]
#[command(about = "KiloFly Core - luggage-space reservation lifecycle service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Reconciliation queue commands
    #[command(subcommand)]
    Reconcile(ReconcileCommands),

    /// Listing maintenance commands
    #[command(subcommand)]
    Listings(ListingCommands),

    /// Access token commands
    #[command(subcommand)]
    Token(TokenCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// List reconciliation entries
    List {
        /// Include resolved entries
        #[arg(long)]
        all: bool,
    },

    /// Retry every open entry once
    Run,
}

#[derive(Subcommand)]
pub enum ListingCommands {
    /// Archive listings more than three days past arrival
    Archive,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a bearer token for a user
    Issue {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Storage Backend: {:?}", config.storage_backend);
    if let Some(url) = &config.database_url {
        println!("  Database URL: {}", mask_password(url));
    }
    println!("  Payment Gateway URL: {}", config.payment_gateway_url);
    println!("  Payment Gateway API Key: {}", mask_secret(&config.payment_gateway_api_key));
    println!("  Platform Commission: {} bps", config.platform_commission_bps);
    println!(
        "  Push Service URL: {}",
        config.push_service_url.as_deref().unwrap_or("(disabled)")
    );
    println!("  Archive Schedule: {}", config.archive_schedule);
    println!("  Auth Token Secret: {}", mask_secret(&config.auth_token_secret));
    println!("  Admin API Key: {}", mask_secret(&config.admin_api_key));

    println!("✓ Configuration is valid");
    Ok(())
}

pub async fn handle_reconcile_list(state: &AppState, all: bool) -> anyhow::Result<()> {
    let entries = state.reconciliation.list(!all).await?;
    if entries.is_empty() {
        println!("No reconciliation entries");
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<22} {:<8} {:<10}",
        "Entry", "Reservation", "Kind", "Retries", "State"
    );
    println!("{}", "-".repeat(118));
    for entry in entries {
        println!(
            "{:<38} {:<38} {:<22} {:<8} {:<10}",
            entry.id,
            entry.reservation_id,
            entry.kind.as_str(),
            entry.retry_count,
            if entry.is_open() { "open" } else { "resolved" }
        );
    }
    Ok(())
}

pub async fn handle_reconcile_run(state: &AppState, max_retries: i32) -> anyhow::Result<()> {
    let run = state.reconciliation.run_once(max_retries).await?;
    println!(
        "✓ Reconciliation run: {} recovered, {} attempted, {} resolved, {} failed, {} skipped",
        run.recovered, run.attempted, run.resolved, run.failed, run.skipped
    );
    Ok(())
}

pub async fn handle_listings_archive(state: &AppState) -> anyhow::Result<()> {
    let archived = state.listings.archive_expired(Utc::now()).await?;
    println!("✓ Archived {} listing(s)", archived.len());
    Ok(())
}

pub fn handle_token_issue(config: &Config, user_id: Uuid) -> anyhow::Result<()> {
    let token = issue_token(&config.auth_token_secret, user_id)?;
    println!("{}", token);
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "(unset)".to_string()
    } else {
        "****".to_string()
    }
}
