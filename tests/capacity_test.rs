mod common;

use common::Harness;
use kilofly_core::domain::ReservationStatus;
use kilofly_core::error::LifecycleError;
use uuid::Uuid;

#[tokio::test]
async fn test_two_concurrent_reservations_over_capacity_admit_exactly_one() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;

    let (a, b) = tokio::join!(
        h.reserve_as(Uuid::new_v4(), &listing, 6, "tok_visa"),
        h.reserve_as(Uuid::new_v4(), &listing, 6, "tok_visa"),
    );

    let outcomes = [a, b];
    let admitted = outcomes.iter().filter(|r| r.is_ok()).count();
    let refused = outcomes
        .iter()
        .filter(|r| matches!(r, Err(LifecycleError::InsufficientCapacity { .. })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(refused, 1);

    let view = h.state.listings.get(listing.id).await.unwrap();
    assert_eq!(view.remaining_kg, 4);
}

#[tokio::test]
async fn test_many_concurrent_reservations_never_overbook() {
    let h = Harness::new();
    let listing = h.listing(25, "3.00").await;

    let attempts = (0..12).map(|_| h.reserve_as(Uuid::new_v4(), &listing, 3, "tok_visa"));
    let results = futures::future::join_all(attempts).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 8);

    let view = h.state.listings.get(listing.id).await.unwrap();
    assert_eq!(view.remaining_kg, 1);
}

#[tokio::test]
async fn test_exact_fit_is_admitted() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;

    h.reserve(&listing, 10).await;
    let err = h
        .reserve_as(Uuid::new_v4(), &listing, 1, "tok_visa")
        .await
        .unwrap_err();
    match err {
        LifecycleError::InsufficientCapacity { requested, remaining } => {
            assert_eq!(requested, 1);
            assert_eq!(remaining, 0);
        }
        other => panic!("expected InsufficientCapacity, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_reservation_releases_capacity() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;

    let first = h.reserve(&listing, 8).await;
    assert!(h
        .reserve_as(Uuid::new_v4(), &listing, 5, "tok_visa")
        .await
        .is_err());

    h.transition(&first, ReservationStatus::Cancelled, &h.buyer())
        .await
        .unwrap();

    h.reserve_as(Uuid::new_v4(), &listing, 5, "tok_visa")
        .await
        .unwrap();
    let view = h.state.listings.get(listing.id).await.unwrap();
    assert_eq!(view.remaining_kg, 5);
}

#[tokio::test]
async fn test_owner_cannot_reserve_own_listing() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;

    let err = h
        .reserve_as(h.seller, &listing, 2, "tok_visa")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Unauthorized(_)));
}

#[tokio::test]
async fn test_invalid_weight_is_rejected_before_capacity() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;

    let err = h
        .reserve_as(h.buyer, &listing, 0, "tok_visa")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
}
