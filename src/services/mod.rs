pub mod capacity;
pub mod feed;
pub mod lifecycle;
pub mod listings;
pub mod notifications;
pub mod payments;
pub mod reconciliation;
pub mod scheduler;
pub mod tracking;
pub mod transition;
pub mod wallet;

pub use capacity::CapacityLedger;
pub use feed::{ChangeFeed, ReservationUpdate};
pub use lifecycle::{ReservationService, ReservationView};
pub use listings::{ListingService, ListingView};
pub use notifications::{DeliveryReport, NotificationDispatcher};
pub use payments::PaymentOrchestrator;
pub use reconciliation::{ReconciliationRun, ReconciliationService};
pub use tracking::TrackingLog;
pub use transition::TransitionGuard;
pub use wallet::WalletService;
