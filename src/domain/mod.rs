//! Domain entities for the reservation lifecycle.
//! Framework-agnostic; persistence lives behind `crate::ports`.

pub mod listing;
pub mod notification;
pub mod payment;
pub mod reconciliation;
pub mod reservation;
pub mod tracking;
pub mod wallet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use listing::{Listing, ListingStatus, NewListing};
pub use notification::{Notification, NotificationKind};
pub use payment::{split_commission, Payment, PaymentStatus};
pub use reconciliation::{ReconciliationEntry, ReconciliationKind};
pub use reservation::{DeliveryMethod, NewReservation, PaymentState, Reservation, ReservationStatus};
pub use tracking::TrackingEvent;
pub use wallet::{EntryKind, Wallet, WalletEntry};

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(Uuid),
    Admin,
    /// Automated collaborators such as a carrier integration or the
    /// reconciliation worker.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Actor::User(id) => id.to_string(),
            Actor::Admin => "admin".to_string(),
            Actor::System => "system".to_string(),
        }
    }
}

/// Role an actor plays relative to a specific reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
    System,
}
