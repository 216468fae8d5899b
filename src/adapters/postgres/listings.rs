use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{parse_column, PostgresStore};
use crate::domain::Listing;
use crate::ports::{ListingRepository, RepositoryError, RepositoryResult};

pub(super) const LISTING_COLUMNS: &str = "id, owner_id, departure_location, arrival_location, \
     departure_date, arrival_date, capacity_kg, price_per_kg, currency, status, created_at, updated_at";

#[async_trait]
impl ListingRepository for PostgresStore {
    async fn insert_listing(&self, listing: &Listing) -> RepositoryResult<Listing> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            r#"
            INSERT INTO listings ({LISTING_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {LISTING_COLUMNS}
            "#
        ))
        .bind(listing.id)
        .bind(listing.owner_id)
        .bind(&listing.departure_location)
        .bind(&listing.arrival_location)
        .bind(listing.departure_date)
        .bind(listing.arrival_date)
        .bind(listing.capacity_kg)
        .bind(&listing.price_per_kg)
        .bind(&listing.currency)
        .bind(listing.status.as_str())
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn get_listing(&self, id: Uuid) -> RepositoryResult<Listing> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("listing {}", id)))?
            .into_domain()
    }

    async fn delete_listing(&self, id: Uuid) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound(format!("listing {}", id)));
        }

        let open: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reservations
                WHERE listing_id = $1
                  AND status NOT IN ('delivered', 'rejected', 'cancelled')
            )
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;
        if open {
            return Err(RepositoryError::Conflict(format!(
                "listing {} has open reservations",
                id
            )));
        }

        sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn archive_listings(&self, arrived_before: DateTime<Utc>) -> RepositoryResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            UPDATE listings
            SET status = 'archived', updated_at = NOW()
            WHERE status IN ('active', 'inactive') AND arrival_date < $1
            RETURNING id
            "#,
        )
        .bind(arrived_before)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ListingRow {
    id: Uuid,
    owner_id: Uuid,
    departure_location: String,
    arrival_location: String,
    departure_date: DateTime<Utc>,
    arrival_date: DateTime<Utc>,
    capacity_kg: i32,
    price_per_kg: BigDecimal,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    pub(super) fn into_domain(self) -> RepositoryResult<Listing> {
        Ok(Listing {
            id: self.id,
            owner_id: self.owner_id,
            departure_location: self.departure_location,
            arrival_location: self.arrival_location,
            departure_date: self.departure_date,
            arrival_date: self.arrival_date,
            capacity_kg: self.capacity_kg,
            price_per_kg: self.price_per_kg,
            currency: self.currency,
            status: parse_column("listings.status", &self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
