//! Background jobs: listing archival on a cron schedule and the
//! reconciliation sweep on a fixed interval. Both log and continue on error.

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::services::listings::ListingService;
use crate::services::reconciliation::ReconciliationService;

/// Runs `archive_expired` at every tick of `schedule`.
pub async fn run_archive_job(listings: ListingService, schedule: String) -> anyhow::Result<()> {
    let schedule = Schedule::from_str(&schedule)
        .map_err(|e| anyhow::anyhow!("invalid archive schedule '{}': {}", schedule, e))?;
    info!("Listing archive job started");

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!("Archive schedule has no further runs");
            return Ok(());
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        sleep(wait).await;

        if let Err(e) = listings.archive_expired(Utc::now()).await {
            error!("Listing archive run failed: {}", e);
        }
    }
}

/// Sweeps open reconciliation entries every `interval`.
pub async fn run_reconciliation_worker(
    service: Arc<ReconciliationService>,
    interval: Duration,
    max_retries: i32,
) {
    info!(
        interval_secs = interval.as_secs(),
        max_retries, "Reconciliation worker started"
    );

    loop {
        sleep(interval).await;

        if let Err(e) = service.run_once(max_retries).await {
            error!("Reconciliation sweep error: {}", e);
        }
    }
}
