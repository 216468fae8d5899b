//! Listing entity: advertised luggage capacity on a flight.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Listings are archived this long after their arrival date.
pub const ARCHIVE_AFTER_ARRIVAL_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Inactive,
    Archived,
    Completed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Inactive => "inactive",
            ListingStatus::Archived => "archived",
            ListingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "inactive" => Ok(ListingStatus::Inactive),
            "archived" => Ok(ListingStatus::Archived),
            "completed" => Ok(ListingStatus::Completed),
            other => Err(format!("unknown listing status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub departure_location: String,
    pub arrival_location: String,
    pub departure_date: DateTime<Utc>,
    pub arrival_date: DateTime<Utc>,
    /// Static ceiling; remaining capacity is always derived.
    pub capacity_kg: i32,
    pub price_per_kg: BigDecimal,
    pub currency: String,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn new(owner_id: Uuid, input: NewListing) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            departure_location: input.departure_location,
            arrival_location: input.arrival_location,
            departure_date: input.departure_date,
            arrival_date: input.arrival_date,
            capacity_kg: input.capacity_kg,
            price_per_kg: input.price_per_kg,
            currency: input.currency.to_uppercase(),
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn archive_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ListingStatus::Active | ListingStatus::Inactive)
            && self.arrival_date + Duration::days(ARCHIVE_AFTER_ARRIVAL_DAYS) < now
    }
}

/// Owner input for a new listing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub departure_location: String,
    pub arrival_location: String,
    pub departure_date: DateTime<Utc>,
    pub arrival_date: DateTime<Utc>,
    pub capacity_kg: i32,
    pub price_per_kg: BigDecimal,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(arrival: DateTime<Utc>) -> Listing {
        Listing::new(
            Uuid::new_v4(),
            NewListing {
                departure_location: "DSS".to_string(),
                arrival_location: "CDG".to_string(),
                departure_date: arrival - Duration::hours(6),
                arrival_date: arrival,
                capacity_kg: 20,
                price_per_kg: BigDecimal::from(8),
                currency: "eur".to_string(),
            },
        )
    }

    #[test]
    fn test_new_listing_is_active_with_upper_currency() {
        let listing = sample(Utc::now());
        assert_eq!(listing.status, ListingStatus::Active);
        assert_eq!(listing.currency, "EUR");
    }

    #[test]
    fn test_archive_due_three_days_after_arrival() {
        let now = Utc::now();
        assert!(!sample(now - Duration::days(2)).archive_due(now));
        assert!(sample(now - Duration::days(4)).archive_due(now));

        let mut archived = sample(now - Duration::days(10));
        archived.status = ListingStatus::Archived;
        assert!(!archived.archive_due(now));
    }
}
