use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::UserId;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: BigDecimal,
    pub currency: String,
}

pub async fn get_wallet(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.wallet.summary(user_id).await?))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<WithdrawalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (wallet, entry) = state
        .wallet
        .request_withdrawal(user_id, request.amount, &request.currency)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "wallet": wallet, "entry": entry })),
    ))
}
