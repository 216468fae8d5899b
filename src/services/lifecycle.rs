//! Reservation lifecycle: creation, guarded transitions and the payment saga
//! that runs alongside them.
//!
//! Gateway calls are only made by the request that won a claim on the
//! reservation (`authorizing` or `capturing`), so two concurrent requests
//! for the same edge never both move money. A lost compare-and-set is
//! retried once from a fresh read before `ConcurrentModification` reaches
//! the caller. The claimed gateway work runs on its own task, so a caller
//! that disconnects mid-request does not leave the claim behind; a claim
//! orphaned by a restart is picked up by `recover_stalled`.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::tracking::effective_status;
use crate::domain::{
    Actor, NewReservation, NotificationKind, Payment, PaymentState, PaymentStatus,
    ReconciliationKind, Reservation, ReservationStatus, Role,
};
use crate::error::LifecycleError;
use crate::ports::{ListingRepository, TrackingRepository};
use crate::services::capacity::CapacityLedger;
use crate::services::feed::{ChangeFeed, ReservationUpdate};
use crate::services::notifications::NotificationDispatcher;
use crate::services::payments::{Authorization, Capture, PaymentOrchestrator, Refund, Release};
use crate::services::transition::{evaluate, party_role, Decision, TransitionGuard};
use crate::validation::validate_new_reservation;

/// Run a claimed payment step on its own task so that dropping the caller's
/// future cannot cancel it halfway.
async fn detached<F>(id: Uuid, step: F) -> Result<Reservation, LifecycleError>
where
    F: Future<Output = Result<Reservation, LifecycleError>> + Send + 'static,
{
    tokio::spawn(step).await.map_err(|e| {
        tracing::error!(reservation_id = %id, "Payment step aborted: {}", e);
        LifecycleError::Repository(format!("payment step for reservation {} aborted: {}", id, e))
    })?
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub effective_status: String,
    pub payments: Vec<Payment>,
}

#[derive(Clone)]
pub struct ReservationService {
    listings: Arc<dyn ListingRepository>,
    tracking: Arc<dyn TrackingRepository>,
    capacity: Arc<CapacityLedger>,
    guard: TransitionGuard,
    payments: PaymentOrchestrator,
    notifier: NotificationDispatcher,
    feed: ChangeFeed,
}

impl ReservationService {
    pub fn new(
        listings: Arc<dyn ListingRepository>,
        tracking: Arc<dyn TrackingRepository>,
        capacity: Arc<CapacityLedger>,
        guard: TransitionGuard,
        payments: PaymentOrchestrator,
        notifier: NotificationDispatcher,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            listings,
            tracking,
            capacity,
            guard,
            payments,
            notifier,
            feed,
        }
    }

    pub fn payments(&self) -> &PaymentOrchestrator {
        &self.payments
    }

    pub async fn create(&self, actor: &Actor, input: NewReservation) -> Result<Reservation, LifecycleError> {
        let buyer_id = actor.user_id().ok_or_else(|| {
            LifecycleError::Unauthorized("reservations are made by users".to_string())
        })?;
        let input = validate_new_reservation(input)?;

        let listing = self.listings.get_listing(input.listing_id).await?;
        if listing.owner_id == buyer_id {
            return Err(LifecycleError::Unauthorized(
                "owners cannot reserve space on their own listing".to_string(),
            ));
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            buyer_id,
            seller_id: listing.owner_id,
            requested_kg: input.requested_kg,
            total_price: listing.price_per_kg.clone() * BigDecimal::from(input.requested_kg),
            currency: listing.currency.clone(),
            item_description: input.item_description,
            delivery_method: input.delivery_method,
            pickup_address: input.pickup_address,
            pickup_notes: input.pickup_notes,
            recipient_phone: input.recipient_phone,
            payment_method: input.payment_method,
            status: ReservationStatus::Pending,
            payment_state: PaymentState::None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let reservation = self.capacity.reserve(&reservation).await?;
        self.notifier
            .notify(
                reservation.seller_id,
                "New reservation request",
                &format!(
                    "{} kg requested on your {} to {} trip",
                    reservation.requested_kg, listing.departure_location, listing.arrival_location
                ),
                NotificationKind::Reservation,
                Some(reservation.id),
            )
            .await;
        self.publish(&reservation).await;
        Ok(reservation)
    }

    pub async fn get(&self, id: Uuid, actor: &Actor) -> Result<ReservationView, LifecycleError> {
        let reservation = self.guard.load(id).await?;
        party_role(&reservation, actor)?;

        let latest = self.tracking.latest_tracking_event(id).await?;
        Ok(ReservationView {
            effective_status: effective_status(&reservation, latest.as_ref()),
            payments: self.payments.history(id).await?,
            reservation,
        })
    }

    /// Request `to` on behalf of `actor`.
    pub async fn attempt_transition(
        &self,
        id: Uuid,
        to: ReservationStatus,
        actor: &Actor,
    ) -> Result<Reservation, LifecycleError> {
        match self.try_transition(id, to, actor).await {
            Err(LifecycleError::ConcurrentModification(_)) => {
                tracing::debug!(reservation_id = %id, to = %to, "Lost a concurrent update, retrying once");
                self.try_transition(id, to, actor).await
            }
            other => other,
        }
    }

    async fn try_transition(
        &self,
        id: Uuid,
        to: ReservationStatus,
        actor: &Actor,
    ) -> Result<Reservation, LifecycleError> {
        use ReservationStatus::*;

        let current = self.guard.load(id).await?;
        if let Decision::AlreadyThere = evaluate(&current, to, actor)? {
            return Ok(current);
        }

        match (current.status, to) {
            (Pending, Approved) => self.approve(current).await,
            (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled) => {
                self.close(current, to).await
            }
            (Approved, InProgress) => self.start(current).await,
            (InProgress, Delivered) | (DeliveredPaymentFailed, Delivered) => {
                self.deliver(current).await
            }
            (from, to) => Err(LifecycleError::IllegalTransition { from, to }),
        }
    }

    async fn approve(&self, current: Reservation) -> Result<Reservation, LifecycleError> {
        if current.payment_state != PaymentState::None {
            return Err(LifecycleError::ConcurrentModification(current.id));
        }
        let claimed = self
            .guard
            .compare_and_set(&current, ReservationStatus::Pending, PaymentState::Authorizing)
            .await?;
        let this = self.clone();
        detached(claimed.id, async move {
            this.authorize_claimed(claimed, PaymentState::None).await
        })
        .await
    }

    /// Retry a timed-out authorization. Buyer or seller.
    pub async fn retry_authorization(&self, id: Uuid, actor: &Actor) -> Result<Reservation, LifecycleError> {
        match self.try_retry_authorization(id, actor).await {
            Err(LifecycleError::ConcurrentModification(_)) => {
                self.try_retry_authorization(id, actor).await
            }
            other => other,
        }
    }

    async fn try_retry_authorization(&self, id: Uuid, actor: &Actor) -> Result<Reservation, LifecycleError> {
        let current = self.guard.load(id).await?;
        let role = party_role(&current, actor)?;
        if !matches!(role, Role::Buyer | Role::Seller) {
            return Err(LifecycleError::Unauthorized(
                "only the buyer or seller may retry a payment".to_string(),
            ));
        }
        match (current.status, current.payment_state) {
            (ReservationStatus::Approved, PaymentState::PaymentPending) => {}
            (ReservationStatus::Approved, PaymentState::Authorizing) => {
                return Err(LifecycleError::ConcurrentModification(current.id));
            }
            (status, state) => {
                return Err(LifecycleError::Conflict(format!(
                    "reservation is {} with payment {}; nothing to retry",
                    status, state
                )));
            }
        }

        let claimed = self
            .guard
            .compare_and_set(&current, ReservationStatus::Approved, PaymentState::Authorizing)
            .await?;
        let this = self.clone();
        detached(claimed.id, async move {
            this.authorize_claimed(claimed, PaymentState::PaymentPending).await
        })
        .await
    }

    /// Run the authorization for a reservation holding the `authorizing`
    /// claim. `released` is the payment state to fall back to on a decline.
    async fn authorize_claimed(
        &self,
        claimed: Reservation,
        released: PaymentState,
    ) -> Result<Reservation, LifecycleError> {
        let outcome = match self.payments.authorize(&claimed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_claim(&claimed, claimed.status, released).await;
                return Err(e);
            }
        };

        match outcome {
            Authorization::Authorized(payment) => self.attach_authorization(claimed, payment).await,
            Authorization::Declined { reason, .. } => {
                if let Some(reverted) = self.release_claim(&claimed, claimed.status, released).await {
                    self.publish(&reverted).await;
                }
                for user in [claimed.buyer_id, claimed.seller_id] {
                    self.notify(
                        user,
                        "Payment authorization failed",
                        "The buyer's payment could not be authorized",
                        NotificationKind::Payment,
                        &claimed,
                    )
                    .await;
                }
                Err(LifecycleError::PaymentAuthorizationFailed(reason))
            }
            Authorization::TimedOut { entry, .. } => {
                if let Some(pending) = self
                    .release_claim(&claimed, ReservationStatus::Approved, PaymentState::PaymentPending)
                    .await
                {
                    self.publish(&pending).await;
                }
                for user in [claimed.buyer_id, claimed.seller_id] {
                    self.notify(
                        user,
                        "Payment pending",
                        "The payment provider did not answer in time; the payment can be retried",
                        NotificationKind::Payment,
                        &claimed,
                    )
                    .await;
                }
                Err(LifecycleError::PaymentAuthorizationFailed(format!(
                    "gateway timed out (reconciliation entry {})",
                    entry.id
                )))
            }
        }
    }

    /// Approve a claimed reservation with its recorded authorization. If the
    /// reservation moved on meanwhile, the authorization is voided instead.
    async fn attach_authorization(
        &self,
        claimed: Reservation,
        payment: Payment,
    ) -> Result<Reservation, LifecycleError> {
        match self
            .guard
            .compare_and_set(&claimed, ReservationStatus::Approved, PaymentState::Authorized)
            .await
        {
            Ok(approved) => {
                tracing::info!(reservation_id = %approved.id, payment_id = %payment.id, "Reservation approved");
                self.notify(
                    approved.buyer_id,
                    "Reservation approved",
                    "The traveler accepted your request and your payment is authorized",
                    NotificationKind::Reservation,
                    &approved,
                )
                .await;
                self.publish(&approved).await;
                Ok(approved)
            }
            Err(e) => {
                tracing::warn!(
                    reservation_id = %claimed.id,
                    "Reservation changed during authorization, voiding: {}",
                    e
                );
                self.payments.void_authorization(&claimed, &payment).await;
                Err(e)
            }
        }
    }

    /// Move a claimed reservation to its fallback state. Losing this race
    /// means someone else already moved it on, which is logged and ignored.
    async fn release_claim(
        &self,
        claimed: &Reservation,
        status: ReservationStatus,
        payment_state: PaymentState,
    ) -> Option<Reservation> {
        match self.guard.compare_and_set(claimed, status, payment_state).await {
            Ok(released) => Some(released),
            Err(e) => {
                tracing::warn!(reservation_id = %claimed.id, "Claim not released: {}", e);
                None
            }
        }
    }

    async fn start(&self, current: Reservation) -> Result<Reservation, LifecycleError> {
        if current.payment_state != PaymentState::Authorized {
            return Err(LifecycleError::Conflict(format!(
                "payment is {}; it must be authorized before the trip starts",
                current.payment_state
            )));
        }
        let started = self
            .guard
            .compare_and_set(&current, ReservationStatus::InProgress, PaymentState::Authorized)
            .await?;
        self.notify(
            started.buyer_id,
            "Shipment in progress",
            "The traveler has your item",
            NotificationKind::Reservation,
            &started,
        )
        .await;
        self.publish(&started).await;
        Ok(started)
    }

    async fn deliver(&self, current: Reservation) -> Result<Reservation, LifecycleError> {
        let expected = match current.status {
            ReservationStatus::InProgress => PaymentState::Authorized,
            _ => PaymentState::CaptureFailed,
        };
        if current.payment_state == PaymentState::Capturing {
            return Err(LifecycleError::ConcurrentModification(current.id));
        }
        if current.payment_state != expected {
            return Err(LifecycleError::IllegalTransition {
                from: current.status,
                to: ReservationStatus::Delivered,
            });
        }

        let payment = self
            .capturable_payment(current.id)
            .await?
            .ok_or(LifecycleError::IllegalTransition {
                from: current.status,
                to: ReservationStatus::Delivered,
            })?;

        let claimed = self
            .guard
            .compare_and_set(&current, current.status, PaymentState::Capturing)
            .await?;
        let this = self.clone();
        detached(claimed.id, async move { this.capture_claimed(claimed, payment).await }).await
    }

    /// An earlier attempt may have captured at the gateway but failed to
    /// settle, so a captured payment still counts.
    async fn capturable_payment(&self, id: Uuid) -> Result<Option<Payment>, LifecycleError> {
        Ok(self
            .payments
            .active_payment(id)
            .await?
            .filter(|p| matches!(p.status, PaymentStatus::Authorized | PaymentStatus::Captured)))
    }

    /// Capture for a reservation holding the `capturing` claim.
    async fn capture_claimed(
        &self,
        claimed: Reservation,
        payment: Payment,
    ) -> Result<Reservation, LifecycleError> {
        let outcome = match self.payments.capture(&claimed, payment).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_claim(
                    &claimed,
                    ReservationStatus::DeliveredPaymentFailed,
                    PaymentState::CaptureFailed,
                )
                .await;
                return Err(e);
            }
        };

        match outcome {
            Capture::Captured { credit, .. } => {
                let delivered = self
                    .guard
                    .compare_and_set(&claimed, ReservationStatus::Delivered, PaymentState::Captured)
                    .await?;
                tracing::info!(reservation_id = %delivered.id, credit_id = %credit.id, "Reservation delivered");
                self.notify(
                    delivered.buyer_id,
                    "Delivered",
                    "Your item was delivered",
                    NotificationKind::Reservation,
                    &delivered,
                )
                .await;
                self.notify(
                    delivered.seller_id,
                    "Payment received",
                    &format!("{} {} was added to your wallet", credit.amount, credit.currency),
                    NotificationKind::Wallet,
                    &delivered,
                )
                .await;
                self.publish(&delivered).await;
                Ok(delivered)
            }
            Capture::Failed { entry, reason } => {
                let failed = self
                    .guard
                    .compare_and_set(
                        &claimed,
                        ReservationStatus::DeliveredPaymentFailed,
                        PaymentState::CaptureFailed,
                    )
                    .await?;
                for user in [failed.buyer_id, failed.seller_id] {
                    self.notify(
                        user,
                        "Payment capture failed",
                        "Delivery is recorded but the payment could not be collected yet",
                        NotificationKind::Payment,
                        &failed,
                    )
                    .await;
                }
                self.publish(&failed).await;
                Err(LifecycleError::PaymentCaptureFailed(format!(
                    "{} (reconciliation entry {})",
                    reason, entry.id
                )))
            }
        }
    }

    /// Reject or cancel. Funds that are or may be held (an authorization,
    /// or one that timed out) are released after the status is written; a
    /// failed release leaves the status terminal.
    async fn close(&self, current: Reservation, to: ReservationStatus) -> Result<Reservation, LifecycleError> {
        let holds_funds = matches!(
            current.payment_state,
            PaymentState::Authorized | PaymentState::PaymentPending
        );
        let payment_state = if holds_funds {
            current.payment_state
        } else {
            PaymentState::None
        };

        let closed = self.guard.compare_and_set(&current, to, payment_state).await?;
        tracing::info!(reservation_id = %closed.id, status = %closed.status, "Reservation closed");

        let (user, title) = match to {
            ReservationStatus::Rejected => (closed.buyer_id, "Reservation declined"),
            _ => (closed.seller_id, "Reservation cancelled"),
        };
        self.notify(
            user,
            title,
            &format!("Reservation of {} kg is {}", closed.requested_kg, closed.status),
            NotificationKind::Reservation,
            &closed,
        )
        .await;

        if !holds_funds {
            self.publish(&closed).await;
            return Ok(closed);
        }
        let this = self.clone();
        detached(closed.id, async move { this.refund_closed(closed).await }).await
    }

    async fn refund_closed(&self, closed: Reservation) -> Result<Reservation, LifecycleError> {
        if closed.payment_state == PaymentState::PaymentPending {
            return self.release_closed(closed).await;
        }

        let Some(payment) = self.payments.authorized_payment(closed.id).await? else {
            // Already refunded by an earlier attempt.
            let refunded = self
                .guard
                .compare_and_set(&closed, closed.status, PaymentState::Refunded)
                .await?;
            self.publish(&refunded).await;
            return Ok(refunded);
        };

        match self.payments.refund(&closed, payment).await? {
            Refund::Refunded(payment) => {
                let refunded = self
                    .guard
                    .compare_and_set(&closed, closed.status, PaymentState::Refunded)
                    .await?;
                self.notify(
                    refunded.buyer_id,
                    "Refund issued",
                    &format!("{} {} was released", payment.gross_amount, payment.currency),
                    NotificationKind::Payment,
                    &refunded,
                )
                .await;
                self.publish(&refunded).await;
                Ok(refunded)
            }
            Refund::Failed { entry, reason } => {
                if let Some(failed) = self
                    .release_claim(&closed, closed.status, PaymentState::RefundFailed)
                    .await
                {
                    self.publish(&failed).await;
                }
                self.refund_delayed(&closed).await;
                Err(LifecycleError::RefundFailed(format!(
                    "{} (reconciliation entry {})",
                    reason, entry.id
                )))
            }
        }
    }

    /// Release a closed reservation whose authorization timed out. Until
    /// the gateway confirms, the payment state stays `payment_pending` and
    /// the orphan entry stays open.
    async fn release_closed(&self, closed: Reservation) -> Result<Reservation, LifecycleError> {
        let payment_state = match self.payments.release_pending(&closed).await? {
            Release::Voided { .. } => PaymentState::Refunded,
            Release::NothingHeld => PaymentState::None,
            Release::Failed { entry, reason } => {
                self.publish(&closed).await;
                self.refund_delayed(&closed).await;
                return Err(LifecycleError::RefundFailed(format!(
                    "{} (reconciliation entry {})",
                    reason, entry.id
                )));
            }
        };

        let released = self
            .guard
            .compare_and_set(&closed, closed.status, payment_state)
            .await?;
        if payment_state == PaymentState::Refunded {
            self.notify(
                released.buyer_id,
                "Refund issued",
                "The pending payment hold was released",
                NotificationKind::Payment,
                &released,
            )
            .await;
        }
        self.publish(&released).await;
        Ok(released)
    }

    async fn refund_delayed(&self, closed: &Reservation) {
        self.notify(
            closed.buyer_id,
            "Refund delayed",
            "Your refund could not be issued yet and will be retried",
            NotificationKind::Payment,
            closed,
        )
        .await;
    }

    /// Re-run a failed refund. No-op unless the reservation is in
    /// `refund_failed`.
    pub async fn retry_refund(&self, id: Uuid) -> Result<Reservation, LifecycleError> {
        let current = self.guard.load(id).await?;
        if current.payment_state != PaymentState::RefundFailed {
            return Ok(current);
        }
        self.refund_closed(current).await
    }

    /// Release the pending hold of a closed reservation whose authorization
    /// timed out. No-op unless it is closed in `payment_pending`.
    pub async fn retry_release(&self, id: Uuid) -> Result<Reservation, LifecycleError> {
        let current = self.guard.load(id).await?;
        if current.status.holds_capacity() || current.payment_state != PaymentState::PaymentPending {
            return Ok(current);
        }
        self.release_closed(current).await
    }

    /// Take over a payment step whose caller went away (see
    /// `Reservation::is_stalled`) and drive it to an outcome. A claim is
    /// re-taken with a versioned write first, so a caller that is merely
    /// slow loses its claim instead of racing the sweep.
    pub async fn recover_stalled(&self, stalled: Reservation) -> Result<Reservation, LifecycleError> {
        tracing::warn!(
            reservation_id = %stalled.id,
            status = %stalled.status,
            payment_state = %stalled.payment_state,
            "Recovering stalled payment step"
        );

        match stalled.payment_state {
            PaymentState::Authorizing => {
                let claimed = self
                    .guard
                    .compare_and_set(&stalled, stalled.status, PaymentState::Authorizing)
                    .await?;
                let released = match claimed.status {
                    ReservationStatus::Pending => PaymentState::None,
                    _ => PaymentState::PaymentPending,
                };
                let this = self.clone();
                detached(claimed.id, async move {
                    // The authorization may have been recorded before the
                    // caller went away.
                    match this.payments.authorized_payment(claimed.id).await? {
                        Some(payment) => this.attach_authorization(claimed, payment).await,
                        None => this.authorize_claimed(claimed, released).await,
                    }
                })
                .await
            }
            PaymentState::Capturing => {
                let claimed = self
                    .guard
                    .compare_and_set(&stalled, stalled.status, PaymentState::Capturing)
                    .await?;
                match self.capturable_payment(claimed.id).await? {
                    Some(payment) => {
                        let this = self.clone();
                        detached(claimed.id, async move {
                            this.capture_claimed(claimed, payment).await
                        })
                        .await
                    }
                    None => {
                        let reason = "no capturable payment on record";
                        let entry = self
                            .payments
                            .record_failure(claimed.id, None, ReconciliationKind::CaptureFailed, reason)
                            .await?;
                        if let Some(failed) = self
                            .release_claim(
                                &claimed,
                                ReservationStatus::DeliveredPaymentFailed,
                                PaymentState::CaptureFailed,
                            )
                            .await
                        {
                            self.publish(&failed).await;
                        }
                        Err(LifecycleError::PaymentCaptureFailed(format!(
                            "{} (reconciliation entry {})",
                            reason, entry.id
                        )))
                    }
                }
            }
            PaymentState::Authorized if !stalled.status.holds_capacity() => {
                let this = self.clone();
                detached(stalled.id, async move { this.refund_closed(stalled).await }).await
            }
            _ => Ok(stalled),
        }
    }

    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: NotificationKind,
        reservation: &Reservation,
    ) {
        self.notifier
            .notify(user_id, title, body, kind, Some(reservation.id))
            .await;
    }

    async fn publish(&self, reservation: &Reservation) {
        let latest = match self.tracking.latest_tracking_event(reservation.id).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(reservation_id = %reservation.id, "Tracking lookup failed: {}", e);
                None
            }
        };
        self.feed.publish(ReservationUpdate::new(
            reservation,
            effective_status(reservation, latest.as_ref()),
        ));
    }
}
