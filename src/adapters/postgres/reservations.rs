use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::listings::{ListingRow, LISTING_COLUMNS};
use super::{parse_column, PostgresStore};
use crate::domain::Reservation;
use crate::ports::{RepositoryError, RepositoryResult, ReservationRepository};
use crate::services::capacity;

const RESERVATION_COLUMNS: &str = "id, listing_id, buyer_id, seller_id, requested_kg, total_price, \
     currency, item_description, delivery_method, pickup_address, pickup_notes, recipient_phone, \
     payment_method, status, payment_state, version, created_at, updated_at";

#[async_trait]
impl ReservationRepository for PostgresStore {
    async fn insert_within_capacity(
        &self,
        reservation: &Reservation,
    ) -> RepositoryResult<Reservation> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // The listing row lock serializes admissions per listing.
        let listing = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation.listing_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .ok_or_else(|| RepositoryError::NotFound(format!("listing {}", reservation.listing_id)))?
        .into_domain()?;

        let active = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE listing_id = $1 AND status NOT IN ('rejected', 'cancelled')
            "#
        ))
        .bind(listing.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .into_iter()
        .map(ReservationRow::into_domain)
        .collect::<RepositoryResult<Vec<_>>>()?;

        capacity::admit(&listing, &active, reservation.requested_kg)?;

        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            INSERT INTO reservations ({RESERVATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation.id)
        .bind(reservation.listing_id)
        .bind(reservation.buyer_id)
        .bind(reservation.seller_id)
        .bind(reservation.requested_kg)
        .bind(&reservation.total_price)
        .bind(&reservation.currency)
        .bind(&reservation.item_description)
        .bind(reservation.delivery_method.as_str())
        .bind(&reservation.pickup_address)
        .bind(&reservation.pickup_notes)
        .bind(&reservation.recipient_phone)
        .bind(&reservation.payment_method)
        .bind(reservation.status.as_str())
        .bind(reservation.payment_state.as_str())
        .bind(reservation.version)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        tx.commit().await.map_err(RepositoryError::from)?;
        row.into_domain()
    }

    async fn get_reservation(&self, id: Uuid) -> RepositoryResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("reservation {}", id)))?
            .into_domain()
    }

    async fn active_reservations(&self, listing_id: Uuid) -> RepositoryResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE listing_id = $1 AND status NOT IN ('rejected', 'cancelled')
            ORDER BY created_at
            "#
        ))
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(ReservationRow::into_domain).collect()
    }

    async fn update_reservation(&self, reservation: &Reservation) -> RepositoryResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            UPDATE reservations
            SET status = $1, payment_state = $2, updated_at = $3, version = version + 1
            WHERE id = $4 AND version = $5
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation.status.as_str())
        .bind(reservation.payment_state.as_str())
        .bind(reservation.updated_at)
        .bind(reservation.id)
        .bind(reservation.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if let Some(row) = row {
            return row.into_domain();
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reservations WHERE id = $1)")
            .bind(reservation.id)
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        if exists {
            Err(RepositoryError::VersionConflict(reservation.id))
        } else {
            Err(RepositoryError::NotFound(format!("reservation {}", reservation.id)))
        }
    }

    async fn stalled_reservations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE updated_at < $1
              AND (payment_state IN ('authorizing', 'capturing')
                   OR (status IN ('rejected', 'cancelled') AND payment_state = 'authorized'))
            ORDER BY updated_at
            "#
        ))
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(ReservationRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    listing_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    requested_kg: i32,
    total_price: BigDecimal,
    currency: String,
    item_description: String,
    delivery_method: String,
    pickup_address: Option<String>,
    pickup_notes: Option<String>,
    recipient_phone: Option<String>,
    payment_method: String,
    status: String,
    payment_state: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReservationRow {
    fn into_domain(self) -> RepositoryResult<Reservation> {
        Ok(Reservation {
            id: self.id,
            listing_id: self.listing_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            requested_kg: self.requested_kg,
            total_price: self.total_price,
            currency: self.currency,
            item_description: self.item_description,
            delivery_method: parse_column("reservations.delivery_method", &self.delivery_method)?,
            pickup_address: self.pickup_address,
            pickup_notes: self.pickup_notes,
            recipient_phone: self.recipient_phone,
            payment_method: self.payment_method,
            status: parse_column("reservations.status", &self.status)?,
            payment_state: parse_column("reservations.payment_state", &self.payment_state)?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
