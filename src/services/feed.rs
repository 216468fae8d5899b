use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{PaymentState, Reservation, ReservationStatus};

pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// One change to a reservation as seen by realtime subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationUpdate {
    pub reservation_id: Uuid,
    pub listing_id: Uuid,
    pub status: ReservationStatus,
    /// Latest tracking status, or the coarse status when there is none.
    pub effective_status: String,
    pub payment_state: PaymentState,
    pub timestamp: DateTime<Utc>,
}

impl ReservationUpdate {
    pub fn new(reservation: &Reservation, effective_status: impl Into<String>) -> Self {
        Self {
            reservation_id: reservation.id,
            listing_id: reservation.listing_id,
            status: reservation.status,
            effective_status: effective_status.into(),
            payment_state: reservation.payment_state,
            timestamp: Utc::now(),
        }
    }
}

/// In-process broadcast of reservation updates. Slow subscribers lose the
/// oldest messages rather than block publishers.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ReservationUpdate>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, update: ReservationUpdate) {
        // No subscribers is not an error.
        let receivers = self.tx.send(update).unwrap_or(0);
        tracing::trace!(receivers, "Published reservation update");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationUpdate> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
