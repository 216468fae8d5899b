//! Wallet balance and its append-only ledger.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(EntryKind::Credit),
            "debit" => Ok(EntryKind::Debit),
            other => Err(format!("unknown wallet entry kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub currency: String,
    pub balance: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: EntryKind,
    /// Always positive; `kind` carries the sign.
    pub amount: BigDecimal,
    pub currency: String,
    /// Set on capture credits; a payment is credited at most once.
    pub payment_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletEntry {
    pub fn credit(
        user_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        payment_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(user_id, EntryKind::Credit, amount, currency, payment_id, description)
    }

    pub fn debit(user_id: Uuid, amount: BigDecimal, currency: &str, description: impl Into<String>) -> Self {
        Self::new(user_id, EntryKind::Debit, amount, currency, None, description)
    }

    fn new(
        user_id: Uuid,
        kind: EntryKind,
        amount: BigDecimal,
        currency: &str,
        payment_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            currency: currency.to_uppercase(),
            payment_id,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    pub fn signed_amount(&self) -> BigDecimal {
        match self.kind {
            EntryKind::Credit => self.amount.clone(),
            EntryKind::Debit => -self.amount.clone(),
        }
    }
}

/// Balance implied by a ledger: credits minus debits.
pub fn ledger_balance<'a>(entries: impl IntoIterator<Item = &'a WalletEntry>) -> BigDecimal {
    entries
        .into_iter()
        .fold(BigDecimal::from(0), |acc, entry| acc + entry.signed_amount())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_balance_sums_signed_entries() {
        let user = Uuid::new_v4();
        let entries = vec![
            WalletEntry::credit(user, "100.50".parse().unwrap(), "eur", None, "capture"),
            WalletEntry::debit(user, "40.25".parse().unwrap(), "EUR", "withdrawal"),
        ];
        assert_eq!(ledger_balance(&entries), "60.25".parse::<BigDecimal>().unwrap());
        assert_eq!(entries[0].currency, "EUR");
    }

    #[test]
    fn test_empty_ledger_is_zero() {
        assert_eq!(ledger_balance(&Vec::new()), BigDecimal::from(0));
    }
}
