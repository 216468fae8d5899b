//! Remaining capacity of a listing, derived from its reservations.
//!
//! `remaining_kg` is the only place the aggregation is computed. Store
//! adapters call `admit` inside their per-listing critical section so the
//! check and the insert cannot interleave with another buyer's.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Listing, ListingStatus, Reservation};
use crate::ports::{ListingRepository, RepositoryError, RepositoryResult, ReservationRepository};

/// Capacity minus the kilograms held by non-rejected, non-cancelled
/// reservations, floored at zero.
pub fn remaining_kg(listing: &Listing, reservations: &[Reservation]) -> i32 {
    let committed: i64 = reservations
        .iter()
        .filter(|r| r.listing_id == listing.id && r.status.holds_capacity())
        .map(|r| r.requested_kg as i64)
        .sum();
    (listing.capacity_kg as i64 - committed).max(0) as i32
}

/// Decide whether `requested_kg` more can be booked on `listing`.
pub fn admit(listing: &Listing, reservations: &[Reservation], requested_kg: i32) -> RepositoryResult<()> {
    if listing.status != ListingStatus::Active {
        return Err(RepositoryError::Conflict(format!(
            "listing {} is {} and not accepting reservations",
            listing.id, listing.status
        )));
    }

    let remaining = remaining_kg(listing, reservations);
    if requested_kg > remaining {
        return Err(RepositoryError::InsufficientCapacity {
            requested: requested_kg,
            remaining,
        });
    }
    Ok(())
}

pub struct CapacityLedger {
    listings: Arc<dyn ListingRepository>,
    reservations: Arc<dyn ReservationRepository>,
}

impl CapacityLedger {
    pub fn new(
        listings: Arc<dyn ListingRepository>,
        reservations: Arc<dyn ReservationRepository>,
    ) -> Self {
        Self { listings, reservations }
    }

    pub async fn remaining_kg(&self, listing_id: Uuid) -> RepositoryResult<i32> {
        let listing = self.listings.get_listing(listing_id).await?;
        let active = self.reservations.active_reservations(listing_id).await?;
        Ok(remaining_kg(&listing, &active))
    }

    /// Insert `reservation` if it fits. Fails with `InsufficientCapacity`
    /// otherwise; nothing is written in that case.
    pub async fn reserve(&self, reservation: &Reservation) -> RepositoryResult<Reservation> {
        let stored = self.reservations.insert_within_capacity(reservation).await?;
        tracing::info!(
            reservation_id = %stored.id,
            listing_id = %stored.listing_id,
            requested_kg = stored.requested_kg,
            "Capacity reserved"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryMethod, NewListing, PaymentState, ReservationStatus};
    use bigdecimal::BigDecimal;
    use chrono::{Duration, Utc};

    fn listing(capacity_kg: i32) -> Listing {
        let now = Utc::now();
        Listing::new(
            Uuid::new_v4(),
            NewListing {
                departure_location: "ABJ".to_string(),
                arrival_location: "BRU".to_string(),
                departure_date: now + Duration::days(1),
                arrival_date: now + Duration::days(2),
                capacity_kg,
                price_per_kg: BigDecimal::from(10),
                currency: "EUR".to_string(),
            },
        )
    }

    fn reservation(listing: &Listing, kg: i32, status: ReservationStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            buyer_id: Uuid::new_v4(),
            seller_id: listing.owner_id,
            requested_kg: kg,
            total_price: BigDecimal::from(kg * 10),
            currency: "EUR".to_string(),
            item_description: "books".to_string(),
            delivery_method: DeliveryMethod::Handover,
            pickup_address: None,
            pickup_notes: None,
            recipient_phone: None,
            payment_method: "tok_visa".to_string(),
            status,
            payment_state: PaymentState::None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_released_statuses_do_not_count() {
        let l = listing(20);
        let reservations = vec![
            reservation(&l, 5, ReservationStatus::Pending),
            reservation(&l, 4, ReservationStatus::Delivered),
            reservation(&l, 8, ReservationStatus::Rejected),
            reservation(&l, 3, ReservationStatus::Cancelled),
        ];
        assert_eq!(remaining_kg(&l, &reservations), 11);
    }

    #[test]
    fn test_remaining_is_floored_at_zero() {
        let l = listing(5);
        let reservations = vec![reservation(&l, 7, ReservationStatus::Approved)];
        assert_eq!(remaining_kg(&l, &reservations), 0);
    }

    #[test]
    fn test_admit_rejects_over_capacity() {
        let l = listing(10);
        let held = vec![reservation(&l, 6, ReservationStatus::Pending)];
        match admit(&l, &held, 6) {
            Err(RepositoryError::InsufficientCapacity { requested, remaining }) => {
                assert_eq!(requested, 6);
                assert_eq!(remaining, 4);
            }
            other => panic!("expected InsufficientCapacity, got {:?}", other),
        }
        assert!(admit(&l, &held, 4).is_ok());
    }

    #[test]
    fn test_admit_requires_active_listing() {
        let mut l = listing(10);
        l.status = ListingStatus::Archived;
        assert!(matches!(admit(&l, &[], 1), Err(RepositoryError::Conflict(_))));
    }
}
