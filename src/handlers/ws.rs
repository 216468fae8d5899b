use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::Actor;
use crate::error::{AppError, LifecycleError};
use crate::services::ReservationUpdate;
use crate::AppState;

const HEARTBEAT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    reservation_id: Option<Uuid>,
}

/// Users subscribe to one reservation they are party to; admin and system
/// keys may watch the whole feed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .ok_or_else(|| AppError::Unauthenticated("missing token".to_string()))?;
    let actor = state.auth.resolve(&token).map_err(|e| {
        tracing::warn!("Invalid WebSocket authentication token");
        e
    })?;

    match (actor, params.reservation_id) {
        (Actor::User(_), None) => {
            return Err(AppError::Lifecycle(LifecycleError::Unauthorized(
                "users must subscribe to a single reservation".to_string(),
            )))
        }
        (_, Some(id)) => {
            // Party check.
            state.reservations.get(id, &actor).await?;
        }
        _ => {}
    }

    let filter = params.reservation_id;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, filter))
        .into_response())
}

fn wanted(update: &ReservationUpdate, filter: Option<Uuid>) -> bool {
    filter.map_or(true, |id| update.reservation_id == id)
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.feed.subscribe();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => {
                    tracing::debug!("Client closed connection");
                    break;
                }
                Message::Text(text) => tracing::trace!("Ignoring client message: {}", text),
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        tracing::debug!("Client disconnected during heartbeat");
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(update) if wanted(&update, filter) => {
                            let json = match serde_json::to_string(&update) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize update: {}", e);
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(json)).await.is_err() {
                                tracing::debug!("Client disconnected");
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Client lagged behind by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Change feed closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PaymentState, ReservationStatus};
    use chrono::Utc;

    fn update(id: Uuid) -> ReservationUpdate {
        ReservationUpdate {
            reservation_id: id,
            listing_id: Uuid::new_v4(),
            status: ReservationStatus::InProgress,
            effective_status: "in_transit".to_string(),
            payment_state: PaymentState::Authorized,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_filter_matches_only_subscribed_reservation() {
        let id = Uuid::new_v4();
        assert!(wanted(&update(id), Some(id)));
        assert!(!wanted(&update(Uuid::new_v4()), Some(id)));
        assert!(wanted(&update(id), None));
    }
}
