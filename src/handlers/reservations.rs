use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{NewReservation, ReservationStatus};
use crate::error::AppError;
use crate::middleware::auth::Caller;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

pub async fn create_reservation(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(input): Json<NewReservation>,
) -> Result<impl IntoResponse, AppError> {
    let reservation = state.reservations.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reservations.get(id, &actor).await?))
}

pub async fn request_transition(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let to = request
        .status
        .parse::<ReservationStatus>()
        .map_err(AppError::BadRequest)?;

    let reservation = state.reservations.attempt_transition(id, to, &actor).await?;
    Ok(Json(reservation))
}

pub async fn retry_payment(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let reservation = state.reservations.retry_authorization(id, &actor).await?;
    Ok(Json(reservation))
}
