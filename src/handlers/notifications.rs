use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::UserId;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<NotificationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let notifications = state
        .notifications
        .list_for_user(user_id, query.unread_only)
        .await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.notifications.mark_read(user_id, id).await?))
}
