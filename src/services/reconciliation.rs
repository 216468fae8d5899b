//! Operator queue of money movements that did not complete.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Actor, PaymentState, PaymentStatus, ReconciliationEntry, ReconciliationKind, ReservationStatus,
};
use crate::error::LifecycleError;
use crate::ports::{PaymentRepository, ReconciliationRepository, ReservationRepository};
use crate::services::lifecycle::ReservationService;
use crate::services::payments::{Refund, Release};

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct ReconciliationRun {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Entries past the retry cap, left for manual handling.
    pub skipped: usize,
    /// Stalled payment steps taken over from a caller that went away.
    pub recovered: usize,
}

pub struct ReconciliationService {
    entries: Arc<dyn ReconciliationRepository>,
    reservations: Arc<dyn ReservationRepository>,
    payments: Arc<dyn PaymentRepository>,
    lifecycle: Arc<ReservationService>,
}

impl ReconciliationService {
    pub fn new(
        entries: Arc<dyn ReconciliationRepository>,
        reservations: Arc<dyn ReservationRepository>,
        payments: Arc<dyn PaymentRepository>,
        lifecycle: Arc<ReservationService>,
    ) -> Self {
        Self {
            entries,
            reservations,
            payments,
            lifecycle,
        }
    }

    pub async fn list(&self, open_only: bool) -> Result<Vec<ReconciliationEntry>, LifecycleError> {
        Ok(self.entries.list_reconciliation(open_only).await?)
    }

    /// Retry one entry now. Returns the entry as stored afterwards; an
    /// error means the money movement failed again.
    pub async fn retry(&self, id: Uuid) -> Result<ReconciliationEntry, LifecycleError> {
        let entry = self.entries.get_reconciliation(id).await?;
        if !entry.is_open() {
            return Ok(entry);
        }

        let outcome = match entry.kind {
            ReconciliationKind::CaptureFailed => self
                .lifecycle
                .attempt_transition(entry.reservation_id, ReservationStatus::Delivered, &Actor::System)
                .await
                .map(|_| ()),
            ReconciliationKind::RefundFailed => self
                .lifecycle
                .retry_refund(entry.reservation_id)
                .await
                .map(|_| ()),
            ReconciliationKind::OrphanAuthorization => self.settle_orphan(&entry).await,
        };

        let latest = self.entries.get_reconciliation(id).await?;
        match outcome {
            Ok(()) if latest.is_open() => self.lifecycle.payments().resolve(latest).await,
            Ok(()) => Ok(latest),
            Err(e) => {
                // Money-movement failures already bumped the entry.
                if latest.retry_count == entry.retry_count {
                    self.lifecycle
                        .payments()
                        .record_failure(entry.reservation_id, entry.payment_id, entry.kind, &e.to_string())
                        .await?;
                }
                Err(e)
            }
        }
    }

    /// Authorizations that may hold buyer funds outside the payment table.
    async fn settle_orphan(&self, entry: &ReconciliationEntry) -> Result<(), LifecycleError> {
        let reservation = self.reservations.get_reservation(entry.reservation_id).await?;

        if let Some(payment_id) = entry.payment_id {
            let payment = self.payments.get_payment(payment_id).await?;
            let active = self.payments.active_payment(reservation.id).await?;
            let attached =
                !reservation.status.is_terminal() && active.map(|p| p.id) == Some(payment.id);
            if payment.status == PaymentStatus::Authorized && !attached {
                return match self
                    .lifecycle
                    .payments()
                    .refund(&reservation, payment)
                    .await?
                {
                    Refund::Refunded(_) => Ok(()),
                    Refund::Failed { reason, .. } => Err(LifecycleError::RefundFailed(reason)),
                };
            }
        }

        // A timed-out authorization carries no intent reference. While the
        // reservation can still pick it up through a retry it is left alone;
        // once closed, the gateway is asked for the intent under the same key.
        match (reservation.status, reservation.payment_state) {
            (
                _,
                PaymentState::Authorized
                | PaymentState::Capturing
                | PaymentState::Captured
                | PaymentState::CaptureFailed,
            ) => Ok(()),
            (status, PaymentState::PaymentPending) if !status.holds_capacity() => self
                .lifecycle
                .retry_release(reservation.id)
                .await
                .map(|_| ()),
            (status, _) if !status.holds_capacity() => {
                match self.lifecycle.payments().release_pending(&reservation).await? {
                    Release::Voided { .. } | Release::NothingHeld => Ok(()),
                    Release::Failed { reason, .. } => Err(LifecycleError::RefundFailed(reason)),
                }
            }
            _ => Err(LifecycleError::Conflict(
                "authorization is still awaiting a retry".to_string(),
            )),
        }
    }

    /// Take over payment steps whose caller went away, then retry every
    /// open entry below `max_retries` attempts.
    pub async fn run_once(&self, max_retries: i32) -> Result<ReconciliationRun, LifecycleError> {
        let mut run = ReconciliationRun {
            recovered: self.recover_stalled().await?,
            ..ReconciliationRun::default()
        };

        for entry in self.entries.list_reconciliation(true).await? {
            if entry.retry_count >= max_retries {
                run.skipped += 1;
                continue;
            }
            run.attempted += 1;
            match self.retry(entry.id).await {
                Ok(after) if !after.is_open() => run.resolved += 1,
                Ok(_) => run.failed += 1,
                Err(e) => {
                    run.failed += 1;
                    tracing::warn!(entry_id = %entry.id, kind = entry.kind.as_str(), "Reconciliation retry failed: {}", e);
                }
            }
        }

        if run.attempted > 0 || run.skipped > 0 || run.recovered > 0 {
            tracing::info!(
                recovered = run.recovered,
                attempted = run.attempted,
                resolved = run.resolved,
                failed = run.failed,
                skipped = run.skipped,
                "Reconciliation sweep finished"
            );
        }
        Ok(run)
    }

    /// Hand every reservation stalled for longer than the claim TTL back to
    /// the lifecycle. Returns how many were taken over.
    async fn recover_stalled(&self) -> Result<usize, LifecycleError> {
        let ttl = self.lifecycle.payments().claim_ttl();
        let cutoff = Utc::now() - chrono::Duration::milliseconds(ttl.as_millis() as i64);

        let mut recovered = 0;
        for stalled in self.reservations.stalled_reservations(cutoff).await? {
            let id = stalled.id;
            match self.lifecycle.recover_stalled(stalled).await {
                Ok(after) => {
                    recovered += 1;
                    tracing::info!(
                        reservation_id = %id,
                        status = %after.status,
                        payment_state = %after.payment_state,
                        "Stalled payment step recovered"
                    );
                }
                // Someone else moved it on first.
                Err(LifecycleError::ConcurrentModification(_)) => {}
                Err(e) => {
                    recovered += 1;
                    tracing::warn!(reservation_id = %id, "Stalled payment step failed again: {}", e);
                }
            }
        }
        Ok(recovered)
    }
}
