//! Status transition guard.
//!
//! Decides whether an actor may request an edge and performs the versioned
//! write. Every reservation mutation in the crate goes through
//! [`TransitionGuard::compare_and_set`], so a write based on a stale read
//! always fails with `ConcurrentModification`.

use std::sync::Arc;

use crate::domain::{Actor, PaymentState, Reservation, ReservationStatus, Role};
use crate::error::LifecycleError;
use crate::ports::ReservationRepository;

/// What a requested status means for a reservation as currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The reservation already has the requested status.
    AlreadyThere,
    Proceed { role: Role },
}

/// Check `actor` requesting `to` against the edge table.
pub fn evaluate(
    reservation: &Reservation,
    to: ReservationStatus,
    actor: &Actor,
) -> Result<Decision, LifecycleError> {
    let role = party_role(reservation, actor)?;

    if reservation.status == to {
        return Ok(Decision::AlreadyThere);
    }

    let roles = reservation
        .status
        .requestable_by(to)
        .ok_or(LifecycleError::IllegalTransition {
            from: reservation.status,
            to,
        })?;

    if !roles.contains(&role) {
        return Err(LifecycleError::Unauthorized(format!(
            "{:?} may not move a reservation from {} to {}",
            role, reservation.status, to
        )));
    }

    Ok(Decision::Proceed { role })
}

/// The role `actor` plays, or `Unauthorized` if they are no party to it.
pub fn party_role(reservation: &Reservation, actor: &Actor) -> Result<Role, LifecycleError> {
    reservation.role_of(actor).ok_or_else(|| {
        LifecycleError::Unauthorized(format!(
            "{} is not a party to reservation {}",
            actor.label(),
            reservation.id
        ))
    })
}

#[derive(Clone)]
pub struct TransitionGuard {
    reservations: Arc<dyn ReservationRepository>,
}

impl TransitionGuard {
    pub fn new(reservations: Arc<dyn ReservationRepository>) -> Self {
        Self { reservations }
    }

    pub async fn load(&self, id: uuid::Uuid) -> Result<Reservation, LifecycleError> {
        Ok(self.reservations.get_reservation(id).await?)
    }

    /// Write `status` and `payment_state` if `current` is still the stored
    /// version. Status changes must follow an edge of the lifecycle graph.
    pub async fn compare_and_set(
        &self,
        current: &Reservation,
        status: ReservationStatus,
        payment_state: PaymentState,
    ) -> Result<Reservation, LifecycleError> {
        if status != current.status && !current.status.successors().contains(&status) {
            return Err(LifecycleError::IllegalTransition {
                from: current.status,
                to: status,
            });
        }

        let updated = self
            .reservations
            .update_reservation(&current.with_state(status, payment_state))
            .await?;

        tracing::debug!(
            reservation_id = %updated.id,
            from = %current.status,
            to = %updated.status,
            payment_state = %updated.payment_state,
            version = updated.version,
            "Reservation updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeliveryMethod;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use uuid::Uuid;

    fn reservation(status: ReservationStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            requested_kg: 2,
            total_price: BigDecimal::from(30),
            currency: "EUR".to_string(),
            item_description: "documents".to_string(),
            delivery_method: DeliveryMethod::Handover,
            pickup_address: None,
            pickup_notes: None,
            recipient_phone: None,
            payment_method: "tok".to_string(),
            status,
            payment_state: PaymentState::None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_seller_may_approve() {
        let r = reservation(ReservationStatus::Pending);
        let decision = evaluate(&r, ReservationStatus::Approved, &Actor::User(r.seller_id)).unwrap();
        assert_eq!(decision, Decision::Proceed { role: Role::Seller });
    }

    #[test]
    fn test_buyer_may_not_approve() {
        let r = reservation(ReservationStatus::Pending);
        let err = evaluate(&r, ReservationStatus::Approved, &Actor::User(r.buyer_id)).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
    }

    #[test]
    fn test_stranger_is_unauthorized_even_for_noop() {
        let r = reservation(ReservationStatus::Pending);
        let err = evaluate(&r, ReservationStatus::Pending, &Actor::User(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
    }

    #[test]
    fn test_same_status_is_noop() {
        let r = reservation(ReservationStatus::Delivered);
        let decision = evaluate(&r, ReservationStatus::Delivered, &Actor::User(r.seller_id)).unwrap();
        assert_eq!(decision, Decision::AlreadyThere);
    }

    #[test]
    fn test_terminal_status_rejects_everything() {
        let r = reservation(ReservationStatus::Cancelled);
        for to in ReservationStatus::ALL {
            if to == ReservationStatus::Cancelled {
                continue;
            }
            let err = evaluate(&r, to, &Actor::User(r.seller_id)).unwrap_err();
            assert!(matches!(err, LifecycleError::IllegalTransition { .. }), "{}", to);
        }
    }

    #[test]
    fn test_skipping_a_step_is_illegal() {
        let r = reservation(ReservationStatus::Pending);
        let err = evaluate(&r, ReservationStatus::Delivered, &Actor::User(r.seller_id)).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition {
                from: ReservationStatus::Pending,
                to: ReservationStatus::Delivered
            }
        ));
    }

    #[test]
    fn test_admin_has_no_lifecycle_edges() {
        let r = reservation(ReservationStatus::Pending);
        let err = evaluate(&r, ReservationStatus::Rejected, &Actor::Admin).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
    }

    #[test]
    fn test_system_may_retry_capture_only() {
        let r = reservation(ReservationStatus::DeliveredPaymentFailed);
        assert!(evaluate(&r, ReservationStatus::Delivered, &Actor::System).is_ok());

        let r = reservation(ReservationStatus::InProgress);
        assert!(evaluate(&r, ReservationStatus::Delivered, &Actor::System).is_err());
    }
}
