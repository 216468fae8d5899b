//! Payment orchestrator: the money side of the reservation saga.
//!
//! Each step calls the gateway under a bounded timeout, records the outcome
//! as a `Payment`, and leaves a reconciliation entry behind whenever money
//! may have moved without the platform knowing where it ended up. Reservation
//! status changes are left to `ReservationService`, which owns the claims.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{
    Payment, PaymentStatus, ReconciliationEntry, ReconciliationKind, Reservation, WalletEntry,
};
use crate::error::LifecycleError;
use crate::ports::{
    AuthorizationRequest, GatewayError, PaymentGateway, PaymentRepository,
    ReconciliationRepository, RepositoryError,
};
use crate::services::wallet::WalletService;

#[derive(Debug)]
pub enum Authorization {
    Authorized(Payment),
    Declined { payment: Payment, reason: String },
    /// The gateway did not answer in time and may still hold funds.
    TimedOut {
        payment: Payment,
        entry: ReconciliationEntry,
    },
}

#[derive(Debug)]
pub enum Capture {
    Captured { payment: Payment, credit: WalletEntry },
    Failed {
        entry: ReconciliationEntry,
        reason: String,
    },
}

#[derive(Debug)]
pub enum Refund {
    Refunded(Payment),
    Failed {
        entry: ReconciliationEntry,
        reason: String,
    },
}

/// Outcome of releasing an authorization whose intent was never recorded.
#[derive(Debug)]
pub enum Release {
    /// The gateway returned the intent under the reservation's key and it
    /// was voided.
    Voided { intent_ref: String },
    /// The gateway holds nothing under the reservation's key.
    NothingHeld,
    Failed {
        entry: ReconciliationEntry,
        reason: String,
    },
}

/// Claims older than this many gateway timeouts belong to a caller that is
/// gone.
const CLAIM_TTL_TIMEOUTS: u32 = 3;

#[derive(Clone)]
pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentRepository>,
    reconciliation: Arc<dyn ReconciliationRepository>,
    gateway: Arc<dyn PaymentGateway>,
    wallet: WalletService,
    commission_bps: u32,
    timeout: Duration,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        reconciliation: Arc<dyn ReconciliationRepository>,
        gateway: Arc<dyn PaymentGateway>,
        wallet: WalletService,
        commission_bps: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            payments,
            reconciliation,
            gateway,
            wallet,
            commission_bps,
            timeout,
        }
    }

    pub fn commission_bps(&self) -> u32 {
        self.commission_bps
    }

    pub fn gateway_circuit_state(&self) -> String {
        self.gateway.circuit_state()
    }

    /// How long a payment claim may sit before the sweep takes it over.
    pub fn claim_ttl(&self) -> Duration {
        self.timeout * CLAIM_TTL_TIMEOUTS
    }

    fn authorization_request(reservation: &Reservation) -> AuthorizationRequest {
        AuthorizationRequest {
            amount: reservation.total_price.clone(),
            currency: reservation.currency.clone(),
            payer: reservation.payment_method.clone(),
            reference: reservation.id,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    /// The payment currently holding buyer funds, if any.
    pub async fn authorized_payment(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Payment>, LifecycleError> {
        Ok(self
            .payments
            .active_payment(reservation_id)
            .await?
            .filter(|p| p.status == PaymentStatus::Authorized))
    }

    pub async fn active_payment(&self, reservation_id: Uuid) -> Result<Option<Payment>, LifecycleError> {
        Ok(self.payments.active_payment(reservation_id).await?)
    }

    pub async fn history(&self, reservation_id: Uuid) -> Result<Vec<Payment>, LifecycleError> {
        Ok(self.payments.payments_for_reservation(reservation_id).await?)
    }

    /// Authorize the reservation's full price against the buyer's payment
    /// method. The reservation id is the gateway idempotency key, so a
    /// retry after a timeout picks up the original intent.
    pub async fn authorize(&self, reservation: &Reservation) -> Result<Authorization, LifecycleError> {
        let request = Self::authorization_request(reservation);

        match self.bounded(self.gateway.authorize(&request)).await {
            Ok(intent_ref) => self.record_authorization(reservation, intent_ref).await,
            Err(e) if e.is_timeout() => {
                let payment = Payment::for_reservation(
                    reservation,
                    self.commission_bps,
                    PaymentStatus::Failed,
                    None,
                    Some("timeout".to_string()),
                );
                let payment = self.payments.insert_payment(&payment).await?;
                let entry = self
                    .record_failure(
                        reservation.id,
                        Some(payment.id),
                        ReconciliationKind::OrphanAuthorization,
                        "authorization timed out; gateway may hold funds",
                    )
                    .await?;
                Ok(Authorization::TimedOut { payment, entry })
            }
            Err(e) => {
                let reason = e.to_string();
                let payment = Payment::for_reservation(
                    reservation,
                    self.commission_bps,
                    PaymentStatus::Failed,
                    None,
                    Some(reason.clone()),
                );
                let payment = self.payments.insert_payment(&payment).await?;
                tracing::warn!(
                    reservation_id = %reservation.id,
                    payment_id = %payment.id,
                    "Payment authorization failed: {}",
                    reason
                );
                Ok(Authorization::Declined { payment, reason })
            }
        }
    }

    async fn record_authorization(
        &self,
        reservation: &Reservation,
        intent_ref: String,
    ) -> Result<Authorization, LifecycleError> {
        let payment = Payment::for_reservation(
            reservation,
            self.commission_bps,
            PaymentStatus::Authorized,
            Some(intent_ref.clone()),
            None,
        );

        match self.payments.insert_payment(&payment).await {
            Ok(payment) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    payment_id = %payment.id,
                    gross = %payment.gross_amount,
                    commission = %payment.commission_amount,
                    "Payment authorized"
                );
                self.resolve_open(reservation.id, ReconciliationKind::OrphanAuthorization)
                    .await;
                Ok(Authorization::Authorized(payment))
            }
            Err(RepositoryError::Conflict(msg)) => {
                // Same idempotency key, so usually the same intent; only a
                // different one is ours to release.
                let existing = self.payments.active_payment(reservation.id).await?;
                if existing.and_then(|p| p.intent_ref).as_deref() != Some(intent_ref.as_str()) {
                    self.release_unrecorded(reservation, &intent_ref).await;
                }
                tracing::warn!(reservation_id = %reservation.id, "Duplicate authorization: {}", msg);
                Err(LifecycleError::ConcurrentModification(reservation.id))
            }
            Err(e) => {
                self.release_unrecorded(reservation, &intent_ref).await;
                Err(e.into())
            }
        }
    }

    /// Void an intent that never made it into the payment table.
    async fn release_unrecorded(&self, reservation: &Reservation, intent_ref: &str) {
        if let Err(e) = self.bounded(self.gateway.refund(intent_ref)).await {
            tracing::error!(
                reservation_id = %reservation.id,
                intent_ref,
                "Unrecorded authorization could not be voided: {}",
                e
            );
        }
    }

    /// Void an authorization whose reservation moved on before it could be
    /// attached. Failures leave an orphan entry for the reconciliation worker.
    pub async fn void_authorization(&self, reservation: &Reservation, payment: &Payment) {
        let call = match payment.intent_ref.as_deref() {
            Some(intent_ref) => self.bounded(self.gateway.refund(intent_ref)).await,
            None => Ok(()),
        };

        let outcome = match call {
            Ok(()) => self
                .payments
                .update_payment(&payment.with_status(PaymentStatus::Refunded))
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(_) => tracing::info!(
                reservation_id = %reservation.id,
                payment_id = %payment.id,
                "Voided authorization for a reservation that changed concurrently"
            ),
            Err(reason) => {
                let reason = format!("authorization could not be voided: {}", reason);
                if let Err(e) = self
                    .record_failure(
                        reservation.id,
                        Some(payment.id),
                        ReconciliationKind::OrphanAuthorization,
                        &reason,
                    )
                    .await
                {
                    tracing::error!(
                        reservation_id = %reservation.id,
                        payment_id = %payment.id,
                        "Orphan authorization not recorded: {}",
                        e
                    );
                }
            }
        }
    }

    /// Release whatever a timed-out authorization may still hold. The
    /// gateway is asked again under the reservation's idempotency key: it
    /// hands back the original intent, which is then voided, or declines
    /// because nothing was ever held. The open orphan entry is resolved
    /// only once the gateway has confirmed either.
    pub async fn release_pending(&self, reservation: &Reservation) -> Result<Release, LifecycleError> {
        let request = Self::authorization_request(reservation);

        let outcome = match self.bounded(self.gateway.authorize(&request)).await {
            Ok(intent_ref) => {
                let voided = self.bounded(self.gateway.refund(&intent_ref)).await;
                voided.map(|()| Some(intent_ref))
            }
            Err(GatewayError::Declined(_)) => Ok(None),
            Err(e) => Err(e),
        };

        let release = match outcome {
            Ok(Some(intent_ref)) => {
                let voided = Payment::for_reservation(
                    reservation,
                    self.commission_bps,
                    PaymentStatus::Refunded,
                    Some(intent_ref.clone()),
                    None,
                );
                if let Err(e) = self.payments.insert_payment(&voided).await {
                    tracing::warn!(reservation_id = %reservation.id, "Voided intent not recorded: {}", e);
                }
                tracing::info!(reservation_id = %reservation.id, intent_ref = %intent_ref, "Pending authorization voided");
                Release::Voided { intent_ref }
            }
            Ok(None) => {
                tracing::info!(reservation_id = %reservation.id, "Gateway holds no authorization for reservation");
                Release::NothingHeld
            }
            Err(e) => {
                let reason = format!("pending authorization not released: {}", e);
                let entry = self
                    .record_failure(
                        reservation.id,
                        None,
                        ReconciliationKind::OrphanAuthorization,
                        &reason,
                    )
                    .await?;
                return Ok(Release::Failed { entry, reason });
            }
        };

        self.resolve_open(reservation.id, ReconciliationKind::OrphanAuthorization)
            .await;
        Ok(release)
    }

    /// Capture `payment` and credit the seller. A payment already captured
    /// by an earlier attempt skips the gateway and only settles the wallet.
    pub async fn capture(&self, reservation: &Reservation, payment: Payment) -> Result<Capture, LifecycleError> {
        if payment.status != PaymentStatus::Captured {
            let call = match payment.intent_ref.as_deref() {
                Some(intent_ref) => self.bounded(self.gateway.capture(intent_ref)).await,
                None => Err(GatewayError::InvalidResponse(format!(
                    "payment {} has no intent reference",
                    payment.id
                ))),
            };
            if let Err(e) = call {
                let reason = e.to_string();
                let entry = self
                    .record_failure(
                        reservation.id,
                        Some(payment.id),
                        ReconciliationKind::CaptureFailed,
                        &reason,
                    )
                    .await?;
                return Ok(Capture::Failed { entry, reason });
            }
        }

        match self.settle_capture(payment.clone()).await {
            Ok((payment, credit)) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    payment_id = %payment.id,
                    net = %payment.net_amount,
                    "Payment captured"
                );
                self.resolve_open(reservation.id, ReconciliationKind::CaptureFailed)
                    .await;
                Ok(Capture::Captured { payment, credit })
            }
            Err(e) => {
                let reason = format!("captured at gateway but not settled: {}", e);
                let entry = self
                    .record_failure(
                        reservation.id,
                        Some(payment.id),
                        ReconciliationKind::CaptureFailed,
                        &reason,
                    )
                    .await?;
                Ok(Capture::Failed { entry, reason })
            }
        }
    }

    async fn settle_capture(&self, payment: Payment) -> Result<(Payment, WalletEntry), LifecycleError> {
        let payment = if payment.status == PaymentStatus::Captured {
            payment
        } else {
            self.payments
                .update_payment(&payment.with_status(PaymentStatus::Captured))
                .await?
        };
        let credit = self.wallet.credit_capture(&payment).await?;
        Ok((payment, credit))
    }

    /// Refund a capture or void an open authorization.
    pub async fn refund(&self, reservation: &Reservation, payment: Payment) -> Result<Refund, LifecycleError> {
        let call = match payment.intent_ref.as_deref() {
            Some(intent_ref) => self.bounded(self.gateway.refund(intent_ref)).await,
            None => Err(GatewayError::InvalidResponse(format!(
                "payment {} has no intent reference",
                payment.id
            ))),
        };

        match call {
            Ok(()) => {
                let refunded = self
                    .payments
                    .update_payment(&payment.with_status(PaymentStatus::Refunded))
                    .await?;
                tracing::info!(
                    reservation_id = %reservation.id,
                    payment_id = %refunded.id,
                    "Payment refunded"
                );
                self.resolve_open(reservation.id, ReconciliationKind::RefundFailed)
                    .await;
                Ok(Refund::Refunded(refunded))
            }
            Err(e) => {
                let reason = e.to_string();
                let entry = self
                    .record_failure(
                        reservation.id,
                        Some(payment.id),
                        ReconciliationKind::RefundFailed,
                        &reason,
                    )
                    .await?;
                Ok(Refund::Failed { entry, reason })
            }
        }
    }

    /// Open a reconciliation entry, or bump the open one of the same kind.
    pub async fn record_failure(
        &self,
        reservation_id: Uuid,
        payment_id: Option<Uuid>,
        kind: ReconciliationKind,
        reason: &str,
    ) -> Result<ReconciliationEntry, LifecycleError> {
        let entry = match self
            .reconciliation
            .find_open_reconciliation(reservation_id, kind)
            .await?
        {
            Some(mut open) => {
                open.retry_count += 1;
                open.last_retry_at = Some(Utc::now());
                open.error_reason = reason.to_string();
                open.payment_id = payment_id.or(open.payment_id);
                self.reconciliation.update_reconciliation(&open).await?
            }
            None => {
                let entry = ReconciliationEntry::new(reservation_id, payment_id, kind, reason);
                self.reconciliation.enqueue_reconciliation(&entry).await?
            }
        };

        tracing::error!(
            reservation_id = %reservation_id,
            entry_id = %entry.id,
            kind = entry.kind.as_str(),
            retry_count = entry.retry_count,
            "Money movement needs reconciliation: {}",
            reason
        );
        Ok(entry)
    }

    /// Mark the open entry of `kind` resolved. Failure to do so only delays
    /// its cleanup, so it is logged rather than returned.
    pub async fn resolve_open(&self, reservation_id: Uuid, kind: ReconciliationKind) {
        let open = match self
            .reconciliation
            .find_open_reconciliation(reservation_id, kind)
            .await
        {
            Ok(Some(open)) => open,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(reservation_id = %reservation_id, "Reconciliation lookup failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.resolve(open).await {
            tracing::warn!(reservation_id = %reservation_id, "Reconciliation entry not resolved: {}", e);
        }
    }

    pub async fn resolve(&self, mut entry: ReconciliationEntry) -> Result<ReconciliationEntry, LifecycleError> {
        let now = Utc::now();
        entry.resolved_at = Some(now);
        entry.last_retry_at = Some(now);
        let entry = self.reconciliation.update_reconciliation(&entry).await?;
        tracing::info!(
            reservation_id = %entry.reservation_id,
            entry_id = %entry.id,
            kind = entry.kind.as_str(),
            "Reconciliation entry resolved"
        );
        Ok(entry)
    }
}
