//! Runs against a real database when `DATABASE_URL` is set; skipped otherwise.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

use common::{dec, new_reservation, settings};
use kilofly_core::adapters::sandbox_gateway::{SandboxGateway, SandboxMode};
use kilofly_core::adapters::PostgresStore;
use kilofly_core::domain::{
    Actor, Listing, NewListing, PaymentState, Reservation, ReservationStatus, TrackingEvent,
};
use kilofly_core::error::LifecycleError;
use kilofly_core::ports::{RepositoryError, ReservationRepository, TrackingRepository};
use kilofly_core::AppState;

struct PgHarness {
    state: AppState,
    store: Arc<PostgresStore>,
    gateway: Arc<SandboxGateway>,
}

async fn harness() -> Option<PgHarness> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping postgres test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    kilofly_core::db::run_migrations(&pool).await.expect("migrations");

    let gateway = Arc::new(SandboxGateway::new());
    let store = Arc::new(PostgresStore::new(pool));
    let state = AppState::build(store.clone(), gateway.clone(), None, settings());
    Some(PgHarness {
        state,
        store,
        gateway,
    })
}

async fn listing(state: &AppState, owner: Uuid, capacity_kg: i32) -> Listing {
    let departure = Utc::now() + ChronoDuration::days(1);
    state
        .listings
        .create(
            &Actor::User(owner),
            NewListing {
                departure_location: "Brussels BRU".to_string(),
                arrival_location: "Kinshasa FIH".to_string(),
                departure_date: departure,
                arrival_date: departure + ChronoDuration::hours(7),
                capacity_kg,
                price_per_kg: dec("4.00"),
                currency: "EUR".to_string(),
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_postgres_admission_is_atomic() {
    let Some(h) = harness().await else { return };
    let listing = listing(&h.state, Uuid::new_v4(), 10).await;

    let attempts = (0..5).map(|_| {
        let state = h.state.clone();
        let input = new_reservation(listing.id, 6, "tok_visa");
        tokio::spawn(async move {
            state
                .reservations
                .create(&Actor::User(Uuid::new_v4()), input)
                .await
        })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LifecycleError::InsufficientCapacity { .. })));
    assert_eq!(h.state.listings.get(listing.id).await.unwrap().remaining_kg, 4);
}

#[tokio::test]
async fn test_postgres_delivery_credits_once() {
    let Some(h) = harness().await else { return };
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let listing = listing(&h.state, seller, 20).await;
    let reservation = h
        .state
        .reservations
        .create(&Actor::User(buyer), new_reservation(listing.id, 12, "tok_visa"))
        .await
        .unwrap();

    for to in [ReservationStatus::Approved, ReservationStatus::InProgress] {
        h.state
            .reservations
            .attempt_transition(reservation.id, to, &Actor::User(seller))
            .await
            .unwrap();
    }

    h.gateway.set_capture_mode(SandboxMode::Unavailable);
    assert!(h
        .state
        .reservations
        .attempt_transition(reservation.id, ReservationStatus::Delivered, &Actor::User(seller))
        .await
        .is_err());
    let open: Vec<_> = h
        .state
        .reconciliation
        .list(true)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reservation_id == reservation.id)
        .collect();
    assert_eq!(open.len(), 1);

    h.gateway.set_capture_mode(SandboxMode::Succeed);
    h.state.reconciliation.retry(open[0].id).await.unwrap();
    let delivered = h
        .state
        .reservations
        .attempt_transition(reservation.id, ReservationStatus::Delivered, &Actor::User(seller))
        .await
        .unwrap();
    assert_eq!(delivered.payment_state, PaymentState::Captured);

    assert_eq!(h.state.wallet.balance(seller, "EUR").await.unwrap(), dec("43.20"));
    assert_eq!(h.state.wallet.summary(seller).await.unwrap().entries.len(), 1);
}

#[tokio::test]
async fn test_postgres_tracking_sequences_are_gapless() {
    let Some(h) = harness().await else { return };
    let seller = Uuid::new_v4();
    let listing = listing(&h.state, seller, 20).await;
    let reservation = h
        .state
        .reservations
        .create(&Actor::User(Uuid::new_v4()), new_reservation(listing.id, 2, "tok_visa"))
        .await
        .unwrap();
    let reservation_id = reservation.id;

    let appends = (0..6).map(|i| {
        let state = h.state.clone();
        tokio::spawn(async move {
            state
                .tracking
                .append_event(reservation_id, "in_transit", json!({ "ping": i }), &Actor::User(seller))
                .await
        })
    });
    for joined in futures::future::join_all(appends).await {
        joined.unwrap().unwrap();
    }

    let events = h
        .state
        .tracking
        .events(reservation.id, &Actor::User(seller))
        .await
        .unwrap();
    let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=6).collect::<Vec<i64>>());
    assert!(events.windows(2).all(|w| w[0].created_at < w[1].created_at));
}

#[tokio::test]
async fn test_postgres_stalled_claims_are_listed_by_age() {
    let Some(h) = harness().await else { return };
    let listing = listing(&h.state, Uuid::new_v4(), 10).await;
    let reservation = h
        .state
        .reservations
        .create(&Actor::User(Uuid::new_v4()), new_reservation(listing.id, 2, "tok_visa"))
        .await
        .unwrap();
    h.store
        .update_reservation(&reservation.with_state(ReservationStatus::Pending, PaymentState::Authorizing))
        .await
        .unwrap();

    let listed = |rows: Vec<Reservation>| rows.iter().any(|r| r.id == reservation.id);
    let now = Utc::now();
    assert!(!listed(h.store.stalled_reservations(now - ChronoDuration::hours(1)).await.unwrap()));
    assert!(listed(h.store.stalled_reservations(now + ChronoDuration::seconds(1)).await.unwrap()));
}

#[tokio::test]
async fn test_postgres_tracking_append_rechecks_status() {
    let Some(h) = harness().await else { return };
    let seller = Uuid::new_v4();
    let listing = listing(&h.state, seller, 10).await;
    let reservation = h
        .state
        .reservations
        .create(&Actor::User(Uuid::new_v4()), new_reservation(listing.id, 2, "tok_visa"))
        .await
        .unwrap();
    h.state
        .reservations
        .attempt_transition(reservation.id, ReservationStatus::Rejected, &Actor::User(seller))
        .await
        .unwrap();

    let event = TrackingEvent {
        id: Uuid::new_v4(),
        reservation_id: reservation.id,
        sequence: 0,
        status: "arrived".to_string(),
        metadata: json!({}),
        created_by: "carrier".to_string(),
        created_at: Utc::now(),
    };
    let err = h.store.append_tracking_event(&event).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
}
