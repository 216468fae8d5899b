use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Payment, PaymentStatus, Wallet, WalletEntry};
use crate::error::LifecycleError;
use crate::ports::{RepositoryResult, WalletRepository};
use crate::validation::{validate_currency, validate_positive_amount};

#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub wallets: Vec<Wallet>,
    pub entries: Vec<WalletEntry>,
}

#[derive(Clone)]
pub struct WalletService {
    repo: Arc<dyn WalletRepository>,
}

impl WalletService {
    pub fn new(repo: Arc<dyn WalletRepository>) -> Self {
        Self { repo }
    }

    pub async fn summary(&self, user_id: Uuid) -> RepositoryResult<WalletSummary> {
        Ok(WalletSummary {
            wallets: self.repo.wallets(user_id).await?,
            entries: self.repo.wallet_entries(user_id).await?,
        })
    }

    pub async fn balance(&self, user_id: Uuid, currency: &str) -> RepositoryResult<BigDecimal> {
        let currency = currency.to_uppercase();
        Ok(self
            .repo
            .wallets(user_id)
            .await?
            .into_iter()
            .find(|w| w.currency == currency)
            .map(|w| w.balance)
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    /// Credit the seller's share of a captured payment. Crediting the same
    /// payment again returns the original entry.
    pub async fn credit_capture(&self, payment: &Payment) -> Result<WalletEntry, LifecycleError> {
        if payment.status != PaymentStatus::Captured {
            return Err(LifecycleError::Conflict(format!(
                "payment {} is {}, not captured",
                payment.id, payment.status
            )));
        }

        let entry = WalletEntry::credit(
            payment.seller_id,
            payment.net_amount.clone(),
            &payment.currency,
            Some(payment.id),
            format!("Reservation {} delivered", payment.reservation_id),
        );
        let (wallet, entry) = self.repo.append_wallet_entry(&entry).await?;

        tracing::info!(
            payment_id = %payment.id,
            user_id = %payment.seller_id,
            amount = %entry.amount,
            balance = %wallet.balance,
            "Seller wallet credited"
        );
        Ok(entry)
    }

    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: BigDecimal,
        currency: &str,
    ) -> Result<(Wallet, WalletEntry), LifecycleError> {
        validate_positive_amount("amount", &amount)?;
        validate_currency(currency)?;

        let entry = WalletEntry::debit(user_id, amount, currency, "Withdrawal request");
        let (wallet, entry) = self.repo.append_wallet_entry(&entry).await?;

        tracing::info!(
            user_id = %user_id,
            amount = %entry.amount,
            balance = %wallet.balance,
            "Withdrawal requested"
        );
        Ok((wallet, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::wallet::ledger_balance;

    fn captured_payment(net: &str) -> Payment {
        let now = chrono::Utc::now();
        Payment {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            gross_amount: "100.00".parse().unwrap(),
            commission_amount: "10.00".parse().unwrap(),
            net_amount: net.parse().unwrap(),
            currency: "EUR".to_string(),
            commission_bps: 1000,
            status: PaymentStatus::Captured,
            intent_ref: Some("pi_1".to_string()),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_credit_capture_is_idempotent() {
        let service = WalletService::new(Arc::new(InMemoryStore::new()));
        let payment = captured_payment("90.00");

        let first = service.credit_capture(&payment).await.unwrap();
        let second = service.credit_capture(&payment).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            service.balance(payment.seller_id, "EUR").await.unwrap(),
            "90.00".parse::<BigDecimal>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_withdrawal_cannot_overdraw() {
        let service = WalletService::new(Arc::new(InMemoryStore::new()));
        let payment = captured_payment("40.00");
        service.credit_capture(&payment).await.unwrap();

        let err = service
            .request_withdrawal(payment.seller_id, "40.01".parse().unwrap(), "EUR")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InsufficientFunds { .. }));

        let (wallet, _) = service
            .request_withdrawal(payment.seller_id, "15.00".parse().unwrap(), "EUR")
            .await
            .unwrap();
        assert_eq!(wallet.balance, "25.00".parse::<BigDecimal>().unwrap());

        let summary = service.summary(payment.seller_id).await.unwrap();
        assert_eq!(ledger_balance(&summary.entries), wallet.balance);
    }

    #[tokio::test]
    async fn test_withdrawal_requires_positive_amount() {
        let service = WalletService::new(Arc::new(InMemoryStore::new()));
        let err = service
            .request_withdrawal(Uuid::new_v4(), BigDecimal::from(0), "EUR")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn test_uncaptured_payment_is_not_credited() {
        let service = WalletService::new(Arc::new(InMemoryStore::new()));
        let mut payment = captured_payment("90.00");
        payment.status = PaymentStatus::Authorized;
        assert!(service.credit_capture(&payment).await.is_err());
    }
}
