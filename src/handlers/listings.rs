use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::domain::NewListing;
use crate::error::AppError;
use crate::middleware::auth::Caller;
use crate::AppState;

pub async fn create_listing(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(input): Json<NewListing>,
) -> Result<impl IntoResponse, AppError> {
    let listing = state.listings.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.listings.get(id).await?))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.listings.delete(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
