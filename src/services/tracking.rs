use std::sync::Arc;
use uuid::Uuid;

use crate::domain::tracking::effective_status;
use crate::domain::{Actor, NotificationKind, Role, TrackingEvent};
use crate::error::LifecycleError;
use crate::ports::{ReservationRepository, TrackingRepository};
use crate::services::feed::{ChangeFeed, ReservationUpdate};
use crate::services::notifications::NotificationDispatcher;
use crate::services::transition::party_role;
use crate::validation::{validate_tracking_metadata, validate_tracking_status};

/// Append-only shipment events layered over the coarse reservation status.
#[derive(Clone)]
pub struct TrackingLog {
    reservations: Arc<dyn ReservationRepository>,
    tracking: Arc<dyn TrackingRepository>,
    notifier: NotificationDispatcher,
    feed: ChangeFeed,
}

impl TrackingLog {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        tracking: Arc<dyn TrackingRepository>,
        notifier: NotificationDispatcher,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            reservations,
            tracking,
            notifier,
            feed,
        }
    }

    pub async fn append_event(
        &self,
        reservation_id: Uuid,
        status: &str,
        metadata: serde_json::Value,
        actor: &Actor,
    ) -> Result<TrackingEvent, LifecycleError> {
        let status = status.trim();
        validate_tracking_status(status)?;
        validate_tracking_metadata(&metadata)?;

        let reservation = self.reservations.get_reservation(reservation_id).await?;
        let role = party_role(&reservation, actor)?;
        if !matches!(role, Role::Seller | Role::System) {
            return Err(LifecycleError::Unauthorized(
                "only the seller or a carrier integration may add tracking events".to_string(),
            ));
        }
        if !reservation.status.accepts_tracking_events() {
            return Err(LifecycleError::Conflict(format!(
                "reservation {} is {}; tracking is closed",
                reservation.id, reservation.status
            )));
        }

        let event = TrackingEvent {
            id: Uuid::new_v4(),
            reservation_id,
            sequence: 0,
            status: status.to_string(),
            metadata,
            created_by: actor.label(),
            created_at: chrono::Utc::now(),
        };
        // The store re-checks the status under its lock, so an append racing
        // a delivery or cancel still fails with `Conflict`.
        let event = self.tracking.append_tracking_event(&event).await?;

        tracing::info!(
            reservation_id = %reservation_id,
            sequence = event.sequence,
            status = %event.status,
            "Tracking event appended"
        );

        self.notifier
            .notify(
                reservation.buyer_id,
                "Shipment update",
                &format!("Your shipment is now {}", event.status.replace('_', " ")),
                NotificationKind::Tracking,
                Some(reservation_id),
            )
            .await;
        self.feed
            .publish(ReservationUpdate::new(&reservation, event.status.clone()));

        Ok(event)
    }

    /// Events in append order. Readable by both parties, admins and the system.
    pub async fn events(
        &self,
        reservation_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<TrackingEvent>, LifecycleError> {
        let reservation = self.reservations.get_reservation(reservation_id).await?;
        party_role(&reservation, actor)?;
        Ok(self.tracking.tracking_events(reservation_id).await?)
    }

    pub async fn effective_status(&self, reservation_id: Uuid) -> Result<String, LifecycleError> {
        let reservation = self.reservations.get_reservation(reservation_id).await?;
        let latest = self.tracking.latest_tracking_event(reservation_id).await?;
        Ok(effective_status(&reservation, latest.as_ref()))
    }
}
