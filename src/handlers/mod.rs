pub mod admin;
pub mod health;
pub mod listings;
pub mod notifications;
pub mod reservations;
pub mod tracking;
pub mod wallet;
pub mod ws;
