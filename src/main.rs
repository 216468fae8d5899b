use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kilofly_core::cli::{
    self, Cli, Commands, DbCommands, ListingCommands, ReconcileCommands, TokenCommands,
};
use kilofly_core::config::{Config, LogFormat};
use kilofly_core::{create_app, startup};

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Reconcile(ReconcileCommands::List { all }) => {
            let state = startup::build_state(&config).await?;
            cli::handle_reconcile_list(&state, all).await
        }
        Commands::Reconcile(ReconcileCommands::Run) => {
            let state = startup::build_state(&config).await?;
            cli::handle_reconcile_run(&state, config.reconcile_max_retries).await
        }
        Commands::Listings(ListingCommands::Archive) => {
            let state = startup::build_state(&config).await?;
            cli::handle_listings_archive(&state).await
        }
        Commands::Token(TokenCommands::Issue { user_id }) => {
            cli::handle_token_issue(&config, user_id)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = startup::build_state(&config).await?;
    startup::spawn_background_jobs(&state, &config);

    let app = create_app(state, config.cors_allowed_origins.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
