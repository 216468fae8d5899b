use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AdminCaller;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReconciliationQuery {
    #[serde(default = "default_open_only")]
    pub open_only: bool,
}

fn default_open_only() -> bool {
    true
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reconciliation", get(list_reconciliation))
        .route("/reconciliation/:id/retry", post(retry_reconciliation))
        .route("/listings/archive", post(archive_listings))
}

pub async fn list_reconciliation(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Query(query): Query<ReconciliationQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reconciliation.list(query.open_only).await?))
}

pub async fn retry_reconciliation(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reconciliation.retry(id).await?))
}

pub async fn archive_listings(
    State(state): State<AppState>,
    _admin: AdminCaller,
) -> Result<impl IntoResponse, AppError> {
    let archived = state.listings.archive_expired(Utc::now()).await?;
    Ok(Json(serde_json::json!({ "archived": archived })))
}
