#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use kilofly_core::adapters::sandbox_gateway::SandboxGateway;
use kilofly_core::adapters::InMemoryStore;
use kilofly_core::domain::{
    Actor, DeliveryMethod, Listing, NewListing, NewReservation, Reservation, ReservationStatus,
};
use kilofly_core::error::LifecycleError;
use kilofly_core::middleware::auth::AuthKeys;
use kilofly_core::{AppState, Settings};

pub const TOKEN_SECRET: &str = "test-token-secret-0123456789";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const SYSTEM_KEY: &str = "test-carrier-key";
pub const COMMISSION_BPS: u32 = 1000;

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<SandboxGateway>,
    pub seller: Uuid,
    pub buyer: Uuid,
}

pub fn settings() -> Settings {
    Settings {
        commission_bps: COMMISSION_BPS,
        gateway_timeout: Duration::from_millis(200),
        notify_max_attempts: 3,
        notify_retry_base: Duration::from_millis(1),
        feed_capacity: 64,
        auth: AuthKeys::new(
            TOKEN_SECRET.to_string(),
            ADMIN_KEY.to_string(),
            Some(SYSTEM_KEY.to_string()),
        ),
    }
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(SandboxGateway::new());
        let state = AppState::build(store.clone(), gateway.clone(), None, settings());
        Self {
            state,
            store,
            gateway,
            seller: Uuid::new_v4(),
            buyer: Uuid::new_v4(),
        }
    }

    pub fn seller(&self) -> Actor {
        Actor::User(self.seller)
    }

    pub fn buyer(&self) -> Actor {
        Actor::User(self.buyer)
    }

    pub async fn listing(&self, capacity_kg: i32, price_per_kg: &str) -> Listing {
        let departure = Utc::now() + ChronoDuration::days(1);
        self.state
            .listings
            .create(
                &self.seller(),
                NewListing {
                    departure_location: "Paris CDG".to_string(),
                    arrival_location: "Douala DLA".to_string(),
                    departure_date: departure,
                    arrival_date: departure + ChronoDuration::hours(8),
                    capacity_kg,
                    price_per_kg: price_per_kg.parse::<BigDecimal>().unwrap(),
                    currency: "eur".to_string(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn reserve_as(
        &self,
        buyer: Uuid,
        listing: &Listing,
        kg: i32,
        payment_method: &str,
    ) -> Result<Reservation, LifecycleError> {
        self.state
            .reservations
            .create(&Actor::User(buyer), new_reservation(listing.id, kg, payment_method))
            .await
    }

    pub async fn reserve(&self, listing: &Listing, kg: i32) -> Reservation {
        self.reserve_as(self.buyer, listing, kg, "tok_visa").await.unwrap()
    }

    pub async fn transition(
        &self,
        reservation: &Reservation,
        to: ReservationStatus,
        actor: &Actor,
    ) -> Result<Reservation, LifecycleError> {
        self.state
            .reservations
            .attempt_transition(reservation.id, to, actor)
            .await
    }

    /// A reservation carried to `in_progress` with an authorized payment.
    pub async fn in_progress(&self, kg: i32) -> Reservation {
        let listing = self.listing(20, "4.00").await;
        let reservation = self.reserve(&listing, kg).await;
        self.transition(&reservation, ReservationStatus::Approved, &self.seller())
            .await
            .unwrap();
        self.transition(&reservation, ReservationStatus::InProgress, &self.seller())
            .await
            .unwrap()
    }
}

pub fn new_reservation(listing_id: Uuid, kg: i32, payment_method: &str) -> NewReservation {
    NewReservation {
        listing_id,
        requested_kg: kg,
        item_description: "Two boxes of books".to_string(),
        delivery_method: DeliveryMethod::Handover,
        pickup_address: Some("12 Rue de Rivoli, Paris".to_string()),
        pickup_notes: None,
        recipient_phone: Some("+237 6 99 00 11 22".to_string()),
        payment_method: payment_method.to_string(),
    }
}

pub fn dec(value: &str) -> BigDecimal {
    value.parse().unwrap()
}
