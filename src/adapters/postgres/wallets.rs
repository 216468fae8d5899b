use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{parse_column, PostgresStore};
use crate::domain::{EntryKind, Wallet, WalletEntry};
use crate::ports::{RepositoryError, RepositoryResult, WalletRepository};

const ENTRY_COLUMNS: &str =
    "id, user_id, kind, amount, currency, payment_id, description, created_at";

#[async_trait]
impl WalletRepository for PostgresStore {
    async fn wallets(&self, user_id: Uuid) -> RepositoryResult<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, currency, balance, updated_at FROM wallets WHERE user_id = $1 ORDER BY currency",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(WalletRow::into_domain).collect())
    }

    async fn wallet_entries(&self, user_id: Uuid) -> RepositoryResult<Vec<WalletEntry>> {
        let rows = sqlx::query_as::<_, WalletEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM wallet_entries WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(WalletEntryRow::into_domain).collect()
    }

    async fn append_wallet_entry(
        &self,
        entry: &WalletEntry,
    ) -> RepositoryResult<(Wallet, WalletEntry)> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, currency, balance, updated_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.currency)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let wallet = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT user_id, currency, balance, updated_at FROM wallets
            WHERE user_id = $1 AND currency = $2
            FOR UPDATE
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .into_domain();

        // Checked under the wallet lock so concurrent credits for the same
        // payment see each other.
        if let (EntryKind::Credit, Some(payment_id)) = (entry.kind, entry.payment_id) {
            let existing = sqlx::query_as::<_, WalletEntryRow>(&format!(
                "SELECT {ENTRY_COLUMNS} FROM wallet_entries WHERE payment_id = $1 AND kind = 'credit'"
            ))
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
            if let Some(existing) = existing {
                tx.commit().await.map_err(RepositoryError::from)?;
                return Ok((wallet, existing.into_domain()?));
            }
        }

        let new_balance = wallet.balance.clone() + entry.signed_amount();
        if new_balance < BigDecimal::from(0) {
            return Err(RepositoryError::InsufficientFunds {
                balance: wallet.balance,
                requested: entry.amount.clone(),
            });
        }

        let stored = sqlx::query_as::<_, WalletEntryRow>(&format!(
            r#"
            INSERT INTO wallet_entries ({ENTRY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.kind.as_str())
        .bind(&entry.amount)
        .bind(&entry.currency)
        .bind(entry.payment_id)
        .bind(&entry.description)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let wallet = sqlx::query_as::<_, WalletRow>(
            r#"
            UPDATE wallets SET balance = $1, updated_at = $2
            WHERE user_id = $3 AND currency = $4
            RETURNING user_id, currency, balance, updated_at
            "#,
        )
        .bind(&new_balance)
        .bind(entry.created_at)
        .bind(entry.user_id)
        .bind(&entry.currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .into_domain();

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok((wallet, stored.into_domain()?))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: Uuid,
    currency: String,
    balance: BigDecimal,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_domain(self) -> Wallet {
        Wallet {
            user_id: self.user_id,
            currency: self.currency,
            balance: self.balance,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletEntryRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount: BigDecimal,
    currency: String,
    payment_id: Option<Uuid>,
    description: String,
    created_at: DateTime<Utc>,
}

impl WalletEntryRow {
    fn into_domain(self) -> RepositoryResult<WalletEntry> {
        Ok(WalletEntry {
            id: self.id,
            user_id: self.user_id,
            kind: parse_column("wallet_entries.kind", &self.kind)?,
            amount: self.amount,
            currency: self.currency,
            payment_id: self.payment_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}
