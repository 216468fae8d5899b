use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{parse_column, unique_violation, PostgresStore};
use crate::domain::Payment;
use crate::ports::{PaymentRepository, RepositoryError, RepositoryResult};

const PAYMENT_COLUMNS: &str = "id, reservation_id, buyer_id, seller_id, gross_amount, \
     commission_amount, net_amount, currency, commission_bps, status, intent_ref, failure_reason, \
     created_at, updated_at";

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> RepositoryResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments ({PAYMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.reservation_id)
        .bind(payment.buyer_id)
        .bind(payment.seller_id)
        .bind(&payment.gross_amount)
        .bind(&payment.commission_amount)
        .bind(&payment.net_amount)
        .bind(&payment.currency)
        .bind(payment.commission_bps)
        .bind(payment.status.as_str())
        .bind(&payment.intent_ref)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                "payments_one_active",
                format!(
                    "reservation {} already has an active payment",
                    payment.reservation_id
                ),
            )
        })?;

        row.into_domain()
    }

    async fn get_payment(&self, id: Uuid) -> RepositoryResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?
            .into_domain()
    }

    async fn active_payment(&self, reservation_id: Uuid) -> RepositoryResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = $1 AND status <> 'failed'"
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(PaymentRow::into_domain).transpose()
    }

    async fn payments_for_reservation(&self, reservation_id: Uuid) -> RepositoryResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = $1 ORDER BY created_at"
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(PaymentRow::into_domain).collect()
    }

    async fn update_payment(&self, payment: &Payment) -> RepositoryResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            UPDATE payments
            SET status = $1, intent_ref = $2, failure_reason = $3, updated_at = $4
            WHERE id = $5
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.status.as_str())
        .bind(&payment.intent_ref)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(payment.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("payment {}", payment.id)))?
            .into_domain()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    gross_amount: BigDecimal,
    commission_amount: BigDecimal,
    net_amount: BigDecimal,
    currency: String,
    commission_bps: i32,
    status: String,
    intent_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(self) -> RepositoryResult<Payment> {
        Ok(Payment {
            id: self.id,
            reservation_id: self.reservation_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            gross_amount: self.gross_amount,
            commission_amount: self.commission_amount,
            net_amount: self.net_amount,
            currency: self.currency,
            commission_bps: self.commission_bps,
            status: parse_column("payments.status", &self.status)?,
            intent_ref: self.intent_ref,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
