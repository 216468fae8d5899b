mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{Harness, ADMIN_KEY, SYSTEM_KEY, TOKEN_SECRET};
use kilofly_core::create_app;
use kilofly_core::middleware::auth::issue_token;

fn app(h: &Harness) -> Router {
    create_app(h.state.clone(), None)
}

fn user_token(user: Uuid) -> String {
    issue_token(TOKEN_SECRET, user).unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn listing_body() -> Value {
    let departure = Utc::now() + Duration::days(2);
    json!({
        "departure_location": "Paris CDG",
        "arrival_location": "Douala DLA",
        "departure_date": departure,
        "arrival_date": departure + Duration::hours(8),
        "capacity_kg": 15,
        "price_per_kg": "5.00",
        "currency": "EUR"
    })
}

fn reservation_body(listing_id: &str, kg: i32) -> Value {
    json!({
        "listing_id": listing_id,
        "requested_kg": kg,
        "item_description": "Spices and a laptop charger",
        "delivery_method": "handover",
        "pickup_address": "12 Rue de Rivoli, Paris",
        "recipient_phone": "+237 6 99 00 11 22",
        "payment_method": "tok_visa"
    })
}

#[tokio::test]
async fn test_health_is_ok_with_memory_store() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_reservation_flow_over_http() {
    let h = Harness::new();
    let app = app(&h);
    let seller = user_token(h.seller);
    let buyer = user_token(h.buyer);

    let (status, listing) = send(&app, Method::POST, "/listings", Some(&seller), Some(listing_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let listing_id = listing["id"].as_str().unwrap().to_string();

    let (status, reservation) = send(
        &app,
        Method::POST,
        "/reservations",
        Some(&buyer),
        Some(reservation_body(&listing_id, 6)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reservation["status"], "pending");
    assert!(reservation.get("payment_method").is_none());
    let reservation_id = reservation["id"].as_str().unwrap().to_string();

    let (status, approved) = send(
        &app,
        Method::POST,
        &format!("/reservations/{}/transitions", reservation_id),
        Some(&seller),
        Some(json!({ "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["payment_state"], "authorized");

    let (status, event) = send(
        &app,
        Method::POST,
        &format!("/reservations/{}/tracking", reservation_id),
        Some(SYSTEM_KEY),
        Some(json!({ "status": "picked_up" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(event["sequence"], 1);

    let (status, view) = send(
        &app,
        Method::GET,
        &format!("/reservations/{}", reservation_id),
        Some(&buyer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "approved");
    assert_eq!(view["effective_status"], "picked_up");

    let (status, listing) = send(&app, Method::GET, &format!("/listings/{}", listing_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["remaining_kg"], 9);

    let (status, inbox) = send(&app, Method::GET, "/notifications?unread_only=true", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!inbox.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_is_unauthenticated() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), Method::POST, "/listings", None, Some(listing_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let forged = issue_token("some-other-secret", h.seller).unwrap();
    let (status, _) = send(&app(&h), Method::GET, "/wallet", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_require_admin_key() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/admin/reconciliation", Some(&user_token(h.seller)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    let (status, body) = send(&app, Method::GET, "/admin/reconciliation", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(&app, Method::POST, "/admin/listings/archive", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["archived"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_status_is_bad_request() {
    let h = Harness::new();
    let listing = h.listing(10, "5.00").await;
    let reservation = h.reserve(&listing, 2).await;

    let (status, body) = send(
        &app(&h),
        Method::POST,
        &format!("/reservations/{}/transitions", reservation.id),
        Some(&user_token(h.seller)),
        Some(json!({ "status": "shipped" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_lifecycle_errors_carry_codes() {
    let h = Harness::new();
    let app = app(&h);
    let listing = h.listing(10, "5.00").await;
    let reservation = h.reserve(&listing, 8).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/reservations/{}/transitions", reservation.id),
        Some(&user_token(h.buyer)),
        Some(json!({ "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    let (status, body) = send(
        &app,
        Method::POST,
        "/reservations",
        Some(&user_token(Uuid::new_v4())),
        Some(reservation_body(&listing.id.to_string(), 5)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_capacity");

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/reservations/{}", Uuid::new_v4()),
        Some(&user_token(h.buyer)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_withdrawal_over_balance_is_refused() {
    let h = Harness::new();
    let (status, body) = send(
        &app(&h),
        Method::POST,
        "/wallet/withdrawals",
        Some(&user_token(h.seller)),
        Some(json!({ "amount": "10.00", "currency": "EUR" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "insufficient_funds");
}

#[tokio::test]
async fn test_sub_cent_amounts_are_rejected() {
    let h = Harness::new();
    let (status, body) = send(
        &app(&h),
        Method::POST,
        "/wallet/withdrawals",
        Some(&user_token(h.seller)),
        Some(json!({ "amount": "10.005", "currency": "EUR" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let mut listing = listing_body();
    listing["price_per_kg"] = json!("4.999");
    let (status, body) = send(
        &app(&h),
        Method::POST,
        "/listings",
        Some(&user_token(h.seller)),
        Some(listing),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = Harness::new();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}
