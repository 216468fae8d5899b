//! Reservation aggregate and its status machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Actor, Role};

/// Coarse lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Approved,
    InProgress,
    Delivered,
    DeliveredPaymentFailed,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 7] = [
        ReservationStatus::Pending,
        ReservationStatus::Approved,
        ReservationStatus::InProgress,
        ReservationStatus::Delivered,
        ReservationStatus::DeliveredPaymentFailed,
        ReservationStatus::Rejected,
        ReservationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::InProgress => "in_progress",
            ReservationStatus::Delivered => "delivered",
            ReservationStatus::DeliveredPaymentFailed => "delivered_payment_failed",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    /// Once terminal, a reservation never changes status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Delivered | ReservationStatus::Rejected | ReservationStatus::Cancelled
        )
    }

    /// Whether reserved kilograms still count against the listing.
    pub fn holds_capacity(&self) -> bool {
        !matches!(self, ReservationStatus::Rejected | ReservationStatus::Cancelled)
    }

    pub fn accepts_tracking_events(&self) -> bool {
        !self.is_terminal()
    }

    /// Roles allowed to request the edge `self -> to`, or `None` if the edge
    /// cannot be requested at all.
    pub fn requestable_by(&self, to: ReservationStatus) -> Option<&'static [Role]> {
        use ReservationStatus::*;
        match (self, to) {
            (Pending, Approved) | (Pending, Rejected) => Some(&[Role::Seller]),
            (Pending, Cancelled) | (Approved, Cancelled) => Some(&[Role::Buyer]),
            (Approved, InProgress) => Some(&[Role::Seller]),
            (InProgress, Delivered) => Some(&[Role::Seller]),
            (DeliveredPaymentFailed, Delivered) => Some(&[Role::Seller, Role::System]),
            _ => None,
        }
    }

    pub fn can_transition(&self, to: ReservationStatus, role: Role) -> bool {
        self.requestable_by(to)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// Every status a reservation may move to next, including the
    /// `delivered_payment_failed` outcome of a requested delivery.
    pub fn successors(&self) -> &'static [ReservationStatus] {
        use ReservationStatus::*;
        match self {
            Pending => &[Approved, Rejected, Cancelled],
            Approved => &[InProgress, Cancelled],
            InProgress => &[Delivered, DeliveredPaymentFailed],
            DeliveredPaymentFailed => &[Delivered],
            Delivered | Rejected | Cancelled => &[],
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReservationStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown reservation status '{}'", s))
    }
}

/// Payment progress attached to a reservation, independent of its coarse
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    None,
    /// Authorization timed out; awaiting a retry.
    PaymentPending,
    /// Authorization in flight.
    Authorizing,
    Authorized,
    /// Capture in flight.
    Capturing,
    Captured,
    CaptureFailed,
    Refunded,
    RefundFailed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::None => "none",
            PaymentState::PaymentPending => "payment_pending",
            PaymentState::Authorizing => "authorizing",
            PaymentState::Authorized => "authorized",
            PaymentState::Capturing => "capturing",
            PaymentState::Captured => "captured",
            PaymentState::CaptureFailed => "capture_failed",
            PaymentState::Refunded => "refunded",
            PaymentState::RefundFailed => "refund_failed",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PaymentState::None),
            "payment_pending" => Ok(PaymentState::PaymentPending),
            "authorizing" => Ok(PaymentState::Authorizing),
            "authorized" => Ok(PaymentState::Authorized),
            "capturing" => Ok(PaymentState::Capturing),
            "captured" => Ok(PaymentState::Captured),
            "capture_failed" => Ok(PaymentState::CaptureFailed),
            "refunded" => Ok(PaymentState::Refunded),
            "refund_failed" => Ok(PaymentState::RefundFailed),
            other => Err(format!("unknown payment state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Handover,
    Shipping,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Handover => "handover",
            DeliveryMethod::Shipping => "shipping",
        }
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "handover" => Ok(DeliveryMethod::Handover),
            "shipping" => Ok(DeliveryMethod::Shipping),
            other => Err(format!("unknown delivery method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub requested_kg: i32,
    pub total_price: BigDecimal,
    pub currency: String,
    pub item_description: String,
    pub delivery_method: DeliveryMethod,
    pub pickup_address: Option<String>,
    pub pickup_notes: Option<String>,
    pub recipient_phone: Option<String>,
    #[serde(skip_serializing)]
    pub payment_method: String,
    pub status: ReservationStatus,
    pub payment_state: PaymentState,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// The role `actor` plays on this reservation, if any.
    pub fn role_of(&self, actor: &Actor) -> Option<Role> {
        match actor {
            Actor::User(id) if *id == self.buyer_id => Some(Role::Buyer),
            Actor::User(id) if *id == self.seller_id => Some(Role::Seller),
            Actor::User(_) => None,
            Actor::Admin => Some(Role::Admin),
            Actor::System => Some(Role::System),
        }
    }

    /// Parked mid-payment: a gateway call holds the claim, or the reservation
    /// closed with an authorization that was never refunded. A closed
    /// `payment_pending` hold is not included; its orphan entry stays open
    /// until the hold is released.
    pub fn is_stalled(&self) -> bool {
        match self.payment_state {
            PaymentState::Authorizing | PaymentState::Capturing => true,
            PaymentState::Authorized => !self.status.holds_capacity(),
            _ => false,
        }
    }

    /// Copy with the given status and payment state, ready for a versioned
    /// write.
    pub fn with_state(&self, status: ReservationStatus, payment_state: PaymentState) -> Self {
        Self {
            status,
            payment_state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Buyer input for a new reservation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReservation {
    pub listing_id: Uuid,
    pub requested_kg: i32,
    pub item_description: String,
    pub delivery_method: DeliveryMethod,
    pub pickup_address: Option<String>,
    pub pickup_notes: Option<String>,
    pub recipient_phone: Option<String>,
    pub payment_method: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ReservationStatus::ALL {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_seller_only_edges() {
        use ReservationStatus::*;
        assert!(Pending.can_transition(Approved, Role::Seller));
        assert!(!Pending.can_transition(Approved, Role::Buyer));
        assert!(!Pending.can_transition(Approved, Role::Admin));
        assert!(Pending.can_transition(Rejected, Role::Seller));
        assert!(Approved.can_transition(InProgress, Role::Seller));
        assert!(InProgress.can_transition(Delivered, Role::Seller));
    }

    #[test]
    fn test_buyer_cancel_edges() {
        use ReservationStatus::*;
        assert!(Pending.can_transition(Cancelled, Role::Buyer));
        assert!(Approved.can_transition(Cancelled, Role::Buyer));
        assert!(!InProgress.can_transition(Cancelled, Role::Buyer));
        assert!(!Approved.can_transition(Cancelled, Role::Seller));
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for status in ReservationStatus::ALL {
            if status.is_terminal() {
                assert!(status.successors().is_empty(), "{} has successors", status);
                for to in ReservationStatus::ALL {
                    assert!(status.requestable_by(to).is_none());
                }
            }
        }
    }

    #[test]
    fn test_requestable_edges_are_successors() {
        for from in ReservationStatus::ALL {
            for to in ReservationStatus::ALL {
                if from.requestable_by(to).is_some() {
                    assert!(from.successors().contains(&to), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn test_capacity_and_tracking_flags() {
        assert!(ReservationStatus::Pending.holds_capacity());
        assert!(ReservationStatus::Delivered.holds_capacity());
        assert!(!ReservationStatus::Rejected.holds_capacity());
        assert!(!ReservationStatus::Cancelled.holds_capacity());

        assert!(ReservationStatus::InProgress.accepts_tracking_events());
        assert!(ReservationStatus::DeliveredPaymentFailed.accepts_tracking_events());
        assert!(!ReservationStatus::Delivered.accepts_tracking_events());
        assert!(!ReservationStatus::Cancelled.accepts_tracking_events());
    }

    fn reservation(status: ReservationStatus, payment_state: PaymentState) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            requested_kg: 1,
            total_price: BigDecimal::from(10),
            currency: "EUR".to_string(),
            item_description: "books".to_string(),
            delivery_method: DeliveryMethod::Handover,
            pickup_address: None,
            pickup_notes: None,
            recipient_phone: None,
            payment_method: "tok_visa".to_string(),
            status,
            payment_state,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stalled_payment_steps() {
        use PaymentState as P;
        use ReservationStatus as S;
        assert!(reservation(S::Pending, P::Authorizing).is_stalled());
        assert!(reservation(S::InProgress, P::Capturing).is_stalled());
        assert!(reservation(S::Cancelled, P::Authorized).is_stalled());
        assert!(!reservation(S::Approved, P::Authorized).is_stalled());
        assert!(!reservation(S::Cancelled, P::PaymentPending).is_stalled());
        assert!(!reservation(S::Cancelled, P::RefundFailed).is_stalled());
    }

    #[test]
    fn test_payment_state_parse() {
        assert_eq!(
            "payment_pending".parse::<PaymentState>().unwrap(),
            PaymentState::PaymentPending
        );
        assert!("unknown".parse::<PaymentState>().is_err());
    }
}
