use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ReservationStatus;
use crate::ports::RepositoryError;
use crate::validation::ValidationError;

/// Typed outcome of every lifecycle operation.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("insufficient capacity: requested {requested} kg, {remaining} kg remaining")]
    InsufficientCapacity { requested: i32, remaining: i32 },

    #[error("reservation {0} was modified concurrently")]
    ConcurrentModification(Uuid),

    #[error("payment authorization failed: {0}")]
    PaymentAuthorizationFailed(String),

    #[error("payment capture failed: {0}")]
    PaymentCaptureFailed(String),

    #[error("refund failed: {0}")]
    RefundFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        balance: BigDecimal,
        requested: BigDecimal,
    },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Repository(String),
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => LifecycleError::NotFound(what),
            RepositoryError::VersionConflict(id) => LifecycleError::ConcurrentModification(id),
            RepositoryError::InsufficientCapacity { requested, remaining } => {
                LifecycleError::InsufficientCapacity { requested, remaining }
            }
            RepositoryError::InsufficientFunds { balance, requested } => {
                LifecycleError::InsufficientFunds { balance, requested }
            }
            RepositoryError::Conflict(msg) => LifecycleError::Conflict(msg),
            other @ (RepositoryError::Integrity(_) | RepositoryError::Database(_)) => {
                LifecycleError::Repository(other.to_string())
            }
        }
    }
}

impl LifecycleError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::IllegalTransition { .. } => "illegal_transition",
            LifecycleError::InsufficientCapacity { .. } => "insufficient_capacity",
            LifecycleError::ConcurrentModification(_) => "concurrent_modification",
            LifecycleError::PaymentAuthorizationFailed(_) => "payment_authorization_failed",
            LifecycleError::PaymentCaptureFailed(_) => "payment_capture_failed",
            LifecycleError::RefundFailed(_) => "refund_failed",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::Unauthorized(_) => "unauthorized",
            LifecycleError::InsufficientFunds { .. } => "insufficient_funds",
            LifecycleError::Validation(_) => "validation_error",
            LifecycleError::Conflict(_) => "conflict",
            LifecycleError::Repository(_) => "storage_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Lifecycle(err.into())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Lifecycle(err.into())
    }
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Lifecycle(err) => match err {
                LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
                LifecycleError::Unauthorized(_) => StatusCode::FORBIDDEN,
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::IllegalTransition { .. }
                | LifecycleError::InsufficientCapacity { .. }
                | LifecycleError::ConcurrentModification(_)
                | LifecycleError::Conflict(_) => StatusCode::CONFLICT,
                LifecycleError::PaymentAuthorizationFailed(_)
                | LifecycleError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                LifecycleError::PaymentCaptureFailed(_) | LifecycleError::RefundFailed(_) => {
                    StatusCode::BAD_GATEWAY
                }
                LifecycleError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Lifecycle(err) => err.code(),
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
