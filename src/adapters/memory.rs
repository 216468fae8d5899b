//! In-memory implementation of every repository port.
//!
//! State sits behind one mutex that is never held across an await, so each
//! trait method is a single critical section. That makes the capacity
//! check-and-insert and the versioned reservation writes atomic without any
//! further locking.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::wallet::ledger_balance;
use crate::domain::{
    EntryKind, Listing, ListingStatus, Notification, Payment, ReconciliationEntry,
    ReconciliationKind, Reservation, TrackingEvent, Wallet, WalletEntry,
};
use crate::ports::{
    ListingRepository, NotificationRepository, PaymentRepository, ReconciliationRepository,
    RepositoryError, RepositoryResult, ReservationRepository, Store, TrackingRepository,
    WalletRepository,
};
use crate::services::capacity;

#[derive(Default)]
struct State {
    listings: HashMap<Uuid, Listing>,
    reservations: HashMap<Uuid, Reservation>,
    payments: HashMap<Uuid, Payment>,
    wallets: HashMap<(Uuid, String), Wallet>,
    wallet_entries: Vec<WalletEntry>,
    tracking: HashMap<Uuid, Vec<TrackingEvent>>,
    notifications: Vec<Notification>,
    reconciliation: HashMap<Uuid, ReconciliationEntry>,
}

impl State {
    fn active_reservations(&self, listing_id: Uuid) -> Vec<Reservation> {
        self.reservations
            .values()
            .filter(|r| r.listing_id == listing_id && r.status.holds_capacity())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> RepositoryResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Database("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ListingRepository for InMemoryStore {
    async fn insert_listing(&self, listing: &Listing) -> RepositoryResult<Listing> {
        let mut state = self.state()?;
        if state.listings.contains_key(&listing.id) {
            return Err(RepositoryError::Conflict(format!("listing {} exists", listing.id)));
        }
        state.listings.insert(listing.id, listing.clone());
        Ok(listing.clone())
    }

    async fn get_listing(&self, id: Uuid) -> RepositoryResult<Listing> {
        self.state()?
            .listings
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("listing {}", id)))
    }

    async fn delete_listing(&self, id: Uuid) -> RepositoryResult<()> {
        let mut state = self.state()?;
        if !state.listings.contains_key(&id) {
            return Err(RepositoryError::NotFound(format!("listing {}", id)));
        }
        let open = state
            .reservations
            .values()
            .any(|r| r.listing_id == id && !r.status.is_terminal());
        if open {
            return Err(RepositoryError::Conflict(format!(
                "listing {} has open reservations",
                id
            )));
        }
        state.listings.remove(&id);
        Ok(())
    }

    async fn archive_listings(&self, arrived_before: DateTime<Utc>) -> RepositoryResult<Vec<Uuid>> {
        let mut state = self.state()?;
        let now = Utc::now();
        let mut archived = Vec::new();
        for listing in state.listings.values_mut() {
            if matches!(listing.status, ListingStatus::Active | ListingStatus::Inactive)
                && listing.arrival_date < arrived_before
            {
                listing.status = ListingStatus::Archived;
                listing.updated_at = now;
                archived.push(listing.id);
            }
        }
        Ok(archived)
    }
}

#[async_trait]
impl ReservationRepository for InMemoryStore {
    async fn insert_within_capacity(
        &self,
        reservation: &Reservation,
    ) -> RepositoryResult<Reservation> {
        let mut state = self.state()?;
        let listing = state
            .listings
            .get(&reservation.listing_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("listing {}", reservation.listing_id)))?;

        let active = state.active_reservations(listing.id);
        capacity::admit(&listing, &active, reservation.requested_kg)?;

        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation.clone())
    }

    async fn get_reservation(&self, id: Uuid) -> RepositoryResult<Reservation> {
        self.state()?
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("reservation {}", id)))
    }

    async fn active_reservations(&self, listing_id: Uuid) -> RepositoryResult<Vec<Reservation>> {
        Ok(self.state()?.active_reservations(listing_id))
    }

    async fn update_reservation(&self, reservation: &Reservation) -> RepositoryResult<Reservation> {
        let mut state = self.state()?;
        let stored = state
            .reservations
            .get_mut(&reservation.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("reservation {}", reservation.id)))?;

        if stored.version != reservation.version {
            return Err(RepositoryError::VersionConflict(reservation.id));
        }

        stored.status = reservation.status;
        stored.payment_state = reservation.payment_state;
        stored.updated_at = reservation.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn stalled_reservations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Reservation>> {
        let mut stalled: Vec<Reservation> = self
            .state()?
            .reservations
            .values()
            .filter(|r| r.updated_at < updated_before && r.is_stalled())
            .cloned()
            .collect();
        stalled.sort_by_key(|r| r.updated_at);
        Ok(stalled)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> RepositoryResult<Payment> {
        let mut state = self.state()?;
        if payment.is_active() {
            let duplicate = state
                .payments
                .values()
                .any(|p| p.reservation_id == payment.reservation_id && p.is_active());
            if duplicate {
                return Err(RepositoryError::Conflict(format!(
                    "reservation {} already has an active payment",
                    payment.reservation_id
                )));
            }
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get_payment(&self, id: Uuid) -> RepositoryResult<Payment> {
        self.state()?
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))
    }

    async fn active_payment(&self, reservation_id: Uuid) -> RepositoryResult<Option<Payment>> {
        Ok(self
            .state()?
            .payments
            .values()
            .find(|p| p.reservation_id == reservation_id && p.is_active())
            .cloned())
    }

    async fn payments_for_reservation(&self, reservation_id: Uuid) -> RepositoryResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .state()?
            .payments
            .values()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment) -> RepositoryResult<Payment> {
        let mut state = self.state()?;
        let stored = state
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", payment.id)))?;
        stored.status = payment.status;
        stored.intent_ref = payment.intent_ref.clone();
        stored.failure_reason = payment.failure_reason.clone();
        stored.updated_at = payment.updated_at;
        Ok(stored.clone())
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn wallets(&self, user_id: Uuid) -> RepositoryResult<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self
            .state()?
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(wallets)
    }

    async fn wallet_entries(&self, user_id: Uuid) -> RepositoryResult<Vec<WalletEntry>> {
        Ok(self
            .state()?
            .wallet_entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_wallet_entry(
        &self,
        entry: &WalletEntry,
    ) -> RepositoryResult<(Wallet, WalletEntry)> {
        let mut state = self.state()?;
        let key = (entry.user_id, entry.currency.clone());

        if let Some(payment_id) = entry.payment_id {
            let existing = state
                .wallet_entries
                .iter()
                .find(|e| e.payment_id == Some(payment_id) && e.kind == EntryKind::Credit)
                .cloned();
            if let Some(existing) = existing {
                let wallet = state.wallets.get(&key).cloned().ok_or_else(|| {
                    RepositoryError::Integrity(format!("wallet missing for entry {}", existing.id))
                })?;
                return Ok((wallet, existing));
            }
        }

        let balance = ledger_balance(
            state
                .wallet_entries
                .iter()
                .filter(|e| e.user_id == entry.user_id && e.currency == entry.currency),
        );
        let new_balance = balance.clone() + entry.signed_amount();
        if new_balance < bigdecimal::BigDecimal::from(0) {
            return Err(RepositoryError::InsufficientFunds {
                balance,
                requested: entry.amount.clone(),
            });
        }

        state.wallet_entries.push(entry.clone());
        let wallet = Wallet {
            user_id: entry.user_id,
            currency: entry.currency.clone(),
            balance: new_balance,
            updated_at: entry.created_at,
        };
        state.wallets.insert(key, wallet.clone());
        Ok((wallet, entry.clone()))
    }
}

#[async_trait]
impl TrackingRepository for InMemoryStore {
    async fn append_tracking_event(&self, event: &TrackingEvent) -> RepositoryResult<TrackingEvent> {
        let mut state = self.state()?;
        let status = state
            .reservations
            .get(&event.reservation_id)
            .map(|r| r.status)
            .ok_or_else(|| RepositoryError::NotFound(format!("reservation {}", event.reservation_id)))?;
        if !status.accepts_tracking_events() {
            return Err(RepositoryError::Conflict(format!(
                "reservation {} is {} and takes no tracking events",
                event.reservation_id, status
            )));
        }
        let log = state.tracking.entry(event.reservation_id).or_default();

        let mut stored = event.clone();
        stored.sequence = log.len() as i64 + 1;
        if let Some(last) = log.last() {
            if stored.created_at <= last.created_at {
                stored.created_at = last.created_at + Duration::microseconds(1);
            }
        }
        log.push(stored.clone());
        Ok(stored)
    }

    async fn tracking_events(&self, reservation_id: Uuid) -> RepositoryResult<Vec<TrackingEvent>> {
        Ok(self
            .state()?
            .tracking
            .get(&reservation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_tracking_event(
        &self,
        reservation_id: Uuid,
    ) -> RepositoryResult<Option<TrackingEvent>> {
        Ok(self
            .state()?
            .tracking
            .get(&reservation_id)
            .and_then(|log| log.last().cloned()))
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> RepositoryResult<Notification> {
        self.state()?.notifications.push(notification.clone());
        Ok(notification.clone())
    }

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> RepositoryResult<Vec<Notification>> {
        let mut found: Vec<Notification> = self
            .state()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Notification> {
        let mut state = self.state()?;
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("notification {}", id)))?;
        notification.read = true;
        Ok(notification.clone())
    }
}

#[async_trait]
impl ReconciliationRepository for InMemoryStore {
    async fn enqueue_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> RepositoryResult<ReconciliationEntry> {
        self.state()?.reconciliation.insert(entry.id, entry.clone());
        Ok(entry.clone())
    }

    async fn get_reconciliation(&self, id: Uuid) -> RepositoryResult<ReconciliationEntry> {
        self.state()?
            .reconciliation
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("reconciliation entry {}", id)))
    }

    async fn list_reconciliation(&self, open_only: bool) -> RepositoryResult<Vec<ReconciliationEntry>> {
        let mut entries: Vec<ReconciliationEntry> = self
            .state()?
            .reconciliation
            .values()
            .filter(|e| !open_only || e.is_open())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn find_open_reconciliation(
        &self,
        reservation_id: Uuid,
        kind: ReconciliationKind,
    ) -> RepositoryResult<Option<ReconciliationEntry>> {
        Ok(self
            .state()?
            .reconciliation
            .values()
            .find(|e| e.reservation_id == reservation_id && e.kind == kind && e.is_open())
            .cloned())
    }

    async fn update_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> RepositoryResult<ReconciliationEntry> {
        let mut state = self.state()?;
        let stored = state
            .reconciliation
            .get_mut(&entry.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("reconciliation entry {}", entry.id)))?;
        *stored = entry.clone();
        Ok(stored.clone())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> RepositoryResult<()> {
        self.state().map(|_| ())
    }
}
