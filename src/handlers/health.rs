use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::{check_health, GatewayChecker, StoreChecker};
use crate::AppState;

/// 503 when the store is unreachable; an open gateway circuit only degrades.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = StoreChecker::new(state.store.clone());
    let gateway = GatewayChecker::new(state.reservations.payments().clone());
    let response = check_health(&[&store, &gateway], state.started_at).await;

    let status_code = if response.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(response))
}
