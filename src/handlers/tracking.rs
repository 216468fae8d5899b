use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::Caller;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AppendEventRequest {
    pub status: String,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::json!({})
}

pub async fn list_events(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.tracking.events(id, &actor).await?))
}

pub async fn append_event(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
    Json(request): Json<AppendEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let event = state
        .tracking
        .append_event(id, &request.status, request.metadata, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}
