//! Composition root: picks the storage backend and collaborators from
//! configuration and wires them into an [`AppState`].

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{HttpPaymentGateway, HttpPushSender, InMemoryStore, PostgresStore, SandboxGateway};
use crate::config::{Config, StorageBackend};
use crate::ports::{PaymentGateway, PushSender};
use crate::services::scheduler;
use crate::{AppState, Settings};

pub fn payment_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    if config.uses_sandbox_gateway() {
        tracing::warn!("Using the sandbox payment gateway; no money will move");
        return Arc::new(SandboxGateway::new());
    }
    tracing::info!(url = %config.payment_gateway_url, "Payment gateway client initialized");
    Arc::new(HttpPaymentGateway::with_circuit_breaker(
        config.payment_gateway_url.clone(),
        config.payment_gateway_api_key.clone(),
        config.gateway_failure_threshold,
        config.gateway_reset_timeout_secs,
    ))
}

pub fn push_sender(config: &Config) -> Option<Arc<dyn PushSender>> {
    match &config.push_service_url {
        Some(url) => Some(Arc::new(HttpPushSender::new(url.clone()))),
        None => {
            tracing::info!("PUSH_SERVICE_URL not set; push delivery disabled");
            None
        }
    }
}

/// Build the application state. With the postgres backend this connects and
/// applies pending migrations first.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let gateway = payment_gateway(config);
    let push = push_sender(config);
    let settings = Settings::from_config(config);

    let state = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = crate::db::create_pool(config).await?;
            crate::db::run_migrations(&pool).await?;
            AppState::build(Arc::new(PostgresStore::new(pool)), gateway, push, settings)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            AppState::build(Arc::new(InMemoryStore::new()), gateway, push, settings)
        }
    };
    Ok(state)
}

/// Start the listing archive job and the reconciliation worker.
pub fn spawn_background_jobs(state: &AppState, config: &Config) {
    let listings = state.listings.clone();
    let schedule = config.archive_schedule.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler::run_archive_job(listings, schedule).await {
            tracing::error!("Listing archive job stopped: {}", e);
        }
    });

    tokio::spawn(scheduler::run_reconciliation_worker(
        state.reconciliation.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
        config.reconcile_max_retries,
    ));
}
