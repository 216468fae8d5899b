use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::listing::ARCHIVE_AFTER_ARRIVAL_DAYS;
use crate::domain::{Actor, Listing, NewListing};
use crate::error::LifecycleError;
use crate::ports::ListingRepository;
use crate::services::capacity::CapacityLedger;
use crate::validation::validate_new_listing;

#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub remaining_kg: i32,
}

#[derive(Clone)]
pub struct ListingService {
    listings: Arc<dyn ListingRepository>,
    capacity: Arc<CapacityLedger>,
}

impl ListingService {
    pub fn new(listings: Arc<dyn ListingRepository>, capacity: Arc<CapacityLedger>) -> Self {
        Self { listings, capacity }
    }

    pub async fn create(&self, actor: &Actor, input: NewListing) -> Result<Listing, LifecycleError> {
        let owner_id = actor.user_id().ok_or_else(|| {
            LifecycleError::Unauthorized("listings are created by users".to_string())
        })?;
        let input = validate_new_listing(input)?;
        let listing = self.listings.insert_listing(&Listing::new(owner_id, input)).await?;

        tracing::info!(
            listing_id = %listing.id,
            owner_id = %owner_id,
            capacity_kg = listing.capacity_kg,
            "Listing created"
        );
        Ok(listing)
    }

    pub async fn get(&self, id: Uuid) -> Result<ListingView, LifecycleError> {
        let listing = self.listings.get_listing(id).await?;
        let remaining_kg = self.capacity.remaining_kg(id).await?;
        Ok(ListingView {
            listing,
            remaining_kg,
        })
    }

    /// Owner or admin only; refused while reservations are still open.
    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<(), LifecycleError> {
        let listing = self.listings.get_listing(id).await?;
        let allowed = match actor {
            Actor::Admin => true,
            Actor::User(user_id) => *user_id == listing.owner_id,
            Actor::System => false,
        };
        if !allowed {
            return Err(LifecycleError::Unauthorized(format!(
                "{} may not delete listing {}",
                actor.label(),
                id
            )));
        }

        self.listings.delete_listing(id).await?;
        tracing::info!(listing_id = %id, actor = %actor.label(), "Listing deleted");
        Ok(())
    }

    /// Archive listings more than three days past their arrival date.
    pub async fn archive_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, LifecycleError> {
        let cutoff = now - Duration::days(ARCHIVE_AFTER_ARRIVAL_DAYS);
        let archived = self.listings.archive_listings(cutoff).await?;
        if !archived.is_empty() {
            tracing::info!(count = archived.len(), "Archived expired listings");
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::ListingStatus;
    use bigdecimal::BigDecimal;

    fn service() -> ListingService {
        let store = Arc::new(InMemoryStore::new());
        let capacity = Arc::new(CapacityLedger::new(store.clone(), store.clone()));
        ListingService::new(store, capacity)
    }

    fn input(arrival: DateTime<Utc>) -> NewListing {
        NewListing {
            departure_location: "Lagos".to_string(),
            arrival_location: "London".to_string(),
            departure_date: arrival - Duration::hours(7),
            arrival_date: arrival,
            capacity_kg: 15,
            price_per_kg: BigDecimal::from(12),
            currency: "gbp".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_reports_full_capacity() {
        let service = service();
        let owner = Uuid::new_v4();
        let listing = service
            .create(&Actor::User(owner), input(Utc::now() + Duration::days(5)))
            .await
            .unwrap();

        let view = service.get(listing.id).await.unwrap();
        assert_eq!(view.remaining_kg, 15);
        assert_eq!(view.listing.currency, "GBP");
        assert_eq!(view.listing.owner_id, owner);
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_may_delete() {
        let service = service();
        let owner = Uuid::new_v4();
        let listing = service
            .create(&Actor::User(owner), input(Utc::now() + Duration::days(5)))
            .await
            .unwrap();

        let err = service
            .delete(listing.id, &Actor::User(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));

        service.delete(listing.id, &Actor::Admin).await.unwrap();
        assert!(matches!(
            service.get(listing.id).await.unwrap_err(),
            LifecycleError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_archive_expired_only_touches_old_listings() {
        let service = service();
        let owner = Actor::User(Uuid::new_v4());
        let now = Utc::now();
        let old = service.create(&owner, input(now - Duration::days(4))).await.unwrap();
        let recent = service.create(&owner, input(now - Duration::days(1))).await.unwrap();

        let archived = service.archive_expired(now).await.unwrap();
        assert_eq!(archived, vec![old.id]);
        assert_eq!(service.get(old.id).await.unwrap().listing.status, ListingStatus::Archived);
        assert_eq!(service.get(recent.id).await.unwrap().listing.status, ListingStatus::Active);
    }
}
