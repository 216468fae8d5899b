//! Granular shipment events layered on top of the coarse reservation status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Reservation;

pub const TRACKING_STATUS_MAX_LEN: usize = 64;

/// Well-known carrier statuses. Other snake_case values are accepted.
pub const KNOWN_TRACKING_STATUSES: &[&str] =
    &["picked_up", "in_transit", "arrived", "out_for_delivery"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub reservation_id: Uuid,
    /// 1-based position in the reservation's log.
    pub sequence: i64,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Whether `status` is a lower snake_case token of acceptable length.
pub fn is_valid_tracking_status(status: &str) -> bool {
    !status.is_empty()
        && status.len() <= TRACKING_STATUS_MAX_LEN
        && status
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !status.starts_with('_')
}

/// Display status: the latest tracking event overrides the coarse status
/// until the reservation is terminal. A delivered, rejected or cancelled
/// reservation shows that status whatever the carrier last reported.
pub fn effective_status(reservation: &Reservation, latest: Option<&TrackingEvent>) -> String {
    match latest {
        Some(event)
            if event.reservation_id == reservation.id && !reservation.status.is_terminal() =>
        {
            event.status.clone()
        }
        _ => reservation.status.as_str().to_string(),
    }
}
