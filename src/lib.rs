pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;
use crate::middleware::auth::AuthKeys;
use crate::ports::{PaymentGateway, PushSender, Store};
use crate::services::{
    CapacityLedger, ChangeFeed, ListingService, NotificationDispatcher, PaymentOrchestrator,
    ReconciliationService, ReservationService, TrackingLog, TransitionGuard, WalletService,
};

/// Tunables the services are built with.
#[derive(Clone)]
pub struct Settings {
    pub commission_bps: u32,
    pub gateway_timeout: Duration,
    pub notify_max_attempts: u32,
    pub notify_retry_base: Duration,
    pub feed_capacity: usize,
    pub auth: AuthKeys,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            commission_bps: config.platform_commission_bps,
            gateway_timeout: config.gateway_timeout(),
            notify_max_attempts: config.notify_max_attempts,
            notify_retry_base: Duration::from_millis(config.notify_retry_base_ms),
            feed_capacity: services::feed::DEFAULT_FEED_CAPACITY,
            auth: AuthKeys::new(
                config.auth_token_secret.clone(),
                config.admin_api_key.clone(),
                config.system_api_key.clone(),
            ),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub listings: ListingService,
    pub reservations: Arc<ReservationService>,
    pub tracking: TrackingLog,
    pub notifications: NotificationDispatcher,
    pub wallet: WalletService,
    pub reconciliation: Arc<ReconciliationService>,
    pub feed: ChangeFeed,
    pub auth: AuthKeys,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every service over one store.
    pub fn build<S: Store + 'static>(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        push: Option<Arc<dyn PushSender>>,
        settings: Settings,
    ) -> Self {
        let feed = ChangeFeed::new(settings.feed_capacity);
        let capacity = Arc::new(CapacityLedger::new(store.clone(), store.clone()));
        let notifications = NotificationDispatcher::new(
            store.clone(),
            push,
            settings.notify_max_attempts,
            settings.notify_retry_base,
        );
        let wallet = WalletService::new(store.clone());
        let payments = PaymentOrchestrator::new(
            store.clone(),
            store.clone(),
            gateway,
            wallet.clone(),
            settings.commission_bps,
            settings.gateway_timeout,
        );
        let reservations = Arc::new(ReservationService::new(
            store.clone(),
            store.clone(),
            capacity.clone(),
            TransitionGuard::new(store.clone()),
            payments,
            notifications.clone(),
            feed.clone(),
        ));
        let tracking = TrackingLog::new(
            store.clone(),
            store.clone(),
            notifications.clone(),
            feed.clone(),
        );
        let reconciliation = Arc::new(ReconciliationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            reservations.clone(),
        ));

        Self {
            listings: ListingService::new(store.clone(), capacity),
            reservations,
            tracking,
            notifications,
            wallet,
            reconciliation,
            feed,
            auth: settings.auth,
            started_at: Instant::now(),
            store,
        }
    }
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}

pub fn create_app(state: AppState, allowed_origins: Option<&[String]>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/listings", post(handlers::listings::create_listing))
        .route(
            "/listings/:id",
            get(handlers::listings::get_listing).delete(handlers::listings::delete_listing),
        )
        .route("/reservations", post(handlers::reservations::create_reservation))
        .route("/reservations/:id", get(handlers::reservations::get_reservation))
        .route(
            "/reservations/:id/transitions",
            post(handlers::reservations::request_transition),
        )
        .route(
            "/reservations/:id/payment/retry",
            post(handlers::reservations::retry_payment),
        )
        .route(
            "/reservations/:id/tracking",
            get(handlers::tracking::list_events).post(handlers::tracking::append_event),
        )
        .route("/notifications", get(handlers::notifications::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::notifications::mark_read),
        )
        .route("/wallet", get(handlers::wallet::get_wallet))
        .route("/wallet/withdrawals", post(handlers::wallet::request_withdrawal))
        .nest("/admin", handlers::admin::admin_routes())
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}
