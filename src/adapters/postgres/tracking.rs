use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{parse_column, PostgresStore};
use crate::domain::{ReservationStatus, TrackingEvent};
use crate::ports::{RepositoryError, RepositoryResult, TrackingRepository};

const EVENT_COLUMNS: &str = "id, reservation_id, sequence, status, metadata, created_by, created_at";

#[async_trait]
impl TrackingRepository for PostgresStore {
    async fn append_tracking_event(&self, event: &TrackingEvent) -> RepositoryResult<TrackingEvent> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // Appends for one reservation queue behind its row lock, and so do
        // status writes; the status read here is the one the event lands on.
        let status: String =
            sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1 FOR UPDATE")
                .bind(event.reservation_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepositoryError::from)?
                .ok_or_else(|| {
                    RepositoryError::NotFound(format!("reservation {}", event.reservation_id))
                })?;
        let status: ReservationStatus = parse_column("reservations.status", &status)?;
        if !status.accepts_tracking_events() {
            return Err(RepositoryError::Conflict(format!(
                "reservation {} is {} and takes no tracking events",
                event.reservation_id, status
            )));
        }

        let last: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT sequence, created_at FROM tracking_events
            WHERE reservation_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(event.reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let (sequence, created_at) = match last {
            Some((seq, at)) if event.created_at <= at => (seq + 1, at + Duration::microseconds(1)),
            Some((seq, _)) => (seq + 1, event.created_at),
            None => (1, event.created_at),
        };

        let row = sqlx::query_as::<_, TrackingEventRow>(&format!(
            r#"
            INSERT INTO tracking_events ({EVENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.id)
        .bind(event.reservation_id)
        .bind(sequence)
        .bind(&event.status)
        .bind(&event.metadata)
        .bind(&event.created_by)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(row.into_domain())
    }

    async fn tracking_events(&self, reservation_id: Uuid) -> RepositoryResult<Vec<TrackingEvent>> {
        let rows = sqlx::query_as::<_, TrackingEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM tracking_events WHERE reservation_id = $1 ORDER BY sequence"
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(TrackingEventRow::into_domain).collect())
    }

    async fn latest_tracking_event(
        &self,
        reservation_id: Uuid,
    ) -> RepositoryResult<Option<TrackingEvent>> {
        let row = sqlx::query_as::<_, TrackingEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM tracking_events
            WHERE reservation_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(TrackingEventRow::into_domain))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackingEventRow {
    id: Uuid,
    reservation_id: Uuid,
    sequence: i64,
    status: String,
    metadata: serde_json::Value,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TrackingEventRow {
    fn into_domain(self) -> TrackingEvent {
        TrackingEvent {
            id: self.id,
            reservation_id: self.reservation_id,
            sequence: self.sequence,
            status: self.status,
            metadata: self.metadata,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}
