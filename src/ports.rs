//! Ports: the traits the lifecycle core depends on.
//! Adapters under `crate::adapters` implement them for Postgres, memory and
//! HTTP collaborators.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Listing, Notification, Payment, ReconciliationEntry, ReconciliationKind, Reservation,
    TrackingEvent, Wallet, WalletEntry,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict on {0}")]
    VersionConflict(Uuid),

    #[error("insufficient capacity: requested {requested} kg, {remaining} kg remaining")]
    InsufficientCapacity { requested: i32, remaining: i32 },

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        balance: BigDecimal,
        requested: BigDecimal,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn insert_listing(&self, listing: &Listing) -> RepositoryResult<Listing>;

    async fn get_listing(&self, id: Uuid) -> RepositoryResult<Listing>;

    /// Fails with `Conflict` while the listing has non-terminal reservations.
    async fn delete_listing(&self, id: Uuid) -> RepositoryResult<()>;

    /// Archive active/inactive listings whose arrival date is before
    /// `arrived_before`. Returns the archived ids.
    async fn archive_listings(&self, arrived_before: DateTime<Utc>) -> RepositoryResult<Vec<Uuid>>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Insert `reservation` only if its kilograms fit in the listing's
    /// remaining capacity. Check and insert are atomic per listing.
    async fn insert_within_capacity(&self, reservation: &Reservation)
        -> RepositoryResult<Reservation>;

    async fn get_reservation(&self, id: Uuid) -> RepositoryResult<Reservation>;

    /// Reservations on `listing_id` that still hold capacity.
    async fn active_reservations(&self, listing_id: Uuid) -> RepositoryResult<Vec<Reservation>>;

    /// Write status and payment state if the stored version still equals
    /// `reservation.version`. The returned record carries the bumped version.
    async fn update_reservation(&self, reservation: &Reservation) -> RepositoryResult<Reservation>;

    /// Reservations last written before `updated_before` that are parked
    /// mid-payment: an authorize or capture claim, or a closed reservation
    /// whose authorization was never refunded.
    async fn stalled_reservations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Reservation>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Conflict` if an active payment already exists for the
    /// reservation and `payment` is itself active.
    async fn insert_payment(&self, payment: &Payment) -> RepositoryResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> RepositoryResult<Payment>;

    async fn active_payment(&self, reservation_id: Uuid) -> RepositoryResult<Option<Payment>>;

    async fn payments_for_reservation(&self, reservation_id: Uuid) -> RepositoryResult<Vec<Payment>>;

    async fn update_payment(&self, payment: &Payment) -> RepositoryResult<Payment>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn wallets(&self, user_id: Uuid) -> RepositoryResult<Vec<Wallet>>;

    async fn wallet_entries(&self, user_id: Uuid) -> RepositoryResult<Vec<WalletEntry>>;

    /// Append `entry` and move the balance in one atomic step. Debits that
    /// would go negative fail with `InsufficientFunds`; a credit for a payment
    /// already credited returns the existing entry unchanged.
    async fn append_wallet_entry(&self, entry: &WalletEntry) -> RepositoryResult<(Wallet, WalletEntry)>;
}

#[async_trait]
pub trait TrackingRepository: Send + Sync {
    /// Append with the next sequence number. `created_at` is bumped past the
    /// previous event if the clock did not advance.
    async fn append_tracking_event(&self, event: &TrackingEvent) -> RepositoryResult<TrackingEvent>;

    async fn tracking_events(&self, reservation_id: Uuid) -> RepositoryResult<Vec<TrackingEvent>>;

    async fn latest_tracking_event(&self, reservation_id: Uuid)
        -> RepositoryResult<Option<TrackingEvent>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> RepositoryResult<Notification>;

    async fn notifications_for(&self, user_id: Uuid, unread_only: bool)
        -> RepositoryResult<Vec<Notification>>;

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Notification>;
}

#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    async fn enqueue_reconciliation(&self, entry: &ReconciliationEntry)
        -> RepositoryResult<ReconciliationEntry>;

    async fn get_reconciliation(&self, id: Uuid) -> RepositoryResult<ReconciliationEntry>;

    async fn list_reconciliation(&self, open_only: bool) -> RepositoryResult<Vec<ReconciliationEntry>>;

    /// The unresolved entry of `kind` for a reservation, if any.
    async fn find_open_reconciliation(
        &self,
        reservation_id: Uuid,
        kind: ReconciliationKind,
    ) -> RepositoryResult<Option<ReconciliationEntry>>;

    async fn update_reconciliation(&self, entry: &ReconciliationEntry)
        -> RepositoryResult<ReconciliationEntry>;
}

/// Everything the lifecycle core persists.
#[async_trait]
pub trait Store:
    ListingRepository
    + ReservationRepository
    + PaymentRepository
    + WalletRepository
    + TrackingRepository
    + NotificationRepository
    + ReconciliationRepository
{
    async fn ping(&self) -> RepositoryResult<()>;
}

// --- External collaborators ---

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway call timed out")]
    Timeout,

    #[error("circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        match self {
            GatewayError::Timeout => true,
            GatewayError::Request(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub amount: BigDecimal,
    pub currency: String,
    /// Buyer payment token.
    pub payer: String,
    /// Reservation id, sent as the gateway idempotency key.
    pub reference: Uuid,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the gateway's payment-intent reference.
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String, GatewayError>;

    async fn capture(&self, intent_ref: &str) -> Result<(), GatewayError>;

    /// Refund a capture or void an uncaptured authorization.
    async fn refund(&self, intent_ref: &str) -> Result<(), GatewayError>;

    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: String,
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("push service rejected message with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}
