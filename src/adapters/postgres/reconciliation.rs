use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{parse_column, unique_violation, PostgresStore};
use crate::domain::{ReconciliationEntry, ReconciliationKind};
use crate::ports::{ReconciliationRepository, RepositoryError, RepositoryResult};

const ENTRY_COLUMNS: &str = "id, reservation_id, payment_id, kind, error_reason, retry_count, \
     created_at, last_retry_at, resolved_at";

#[async_trait]
impl ReconciliationRepository for PostgresStore {
    async fn enqueue_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> RepositoryResult<ReconciliationEntry> {
        let row = sqlx::query_as::<_, ReconciliationRow>(&format!(
            r#"
            INSERT INTO reconciliation_entries ({ENTRY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.id)
        .bind(entry.reservation_id)
        .bind(entry.payment_id)
        .bind(entry.kind.as_str())
        .bind(&entry.error_reason)
        .bind(entry.retry_count)
        .bind(entry.created_at)
        .bind(entry.last_retry_at)
        .bind(entry.resolved_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                "reconciliation_one_open_per_kind",
                format!(
                    "reservation {} already has an open {} entry",
                    entry.reservation_id,
                    entry.kind.as_str()
                ),
            )
        })?;

        row.into_domain()
    }

    async fn get_reconciliation(&self, id: Uuid) -> RepositoryResult<ReconciliationEntry> {
        let row = sqlx::query_as::<_, ReconciliationRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM reconciliation_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("reconciliation entry {}", id)))?
            .into_domain()
    }

    async fn list_reconciliation(&self, open_only: bool) -> RepositoryResult<Vec<ReconciliationEntry>> {
        let rows = sqlx::query_as::<_, ReconciliationRow>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM reconciliation_entries
            WHERE NOT $1 OR resolved_at IS NULL
            ORDER BY created_at
            "#
        ))
        .bind(open_only)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(ReconciliationRow::into_domain).collect()
    }

    async fn find_open_reconciliation(
        &self,
        reservation_id: Uuid,
        kind: ReconciliationKind,
    ) -> RepositoryResult<Option<ReconciliationEntry>> {
        let row = sqlx::query_as::<_, ReconciliationRow>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM reconciliation_entries
            WHERE reservation_id = $1 AND kind = $2 AND resolved_at IS NULL
            "#
        ))
        .bind(reservation_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(ReconciliationRow::into_domain).transpose()
    }

    async fn update_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> RepositoryResult<ReconciliationEntry> {
        let row = sqlx::query_as::<_, ReconciliationRow>(&format!(
            r#"
            UPDATE reconciliation_entries
            SET error_reason = $1, retry_count = $2, last_retry_at = $3, resolved_at = $4
            WHERE id = $5
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(&entry.error_reason)
        .bind(entry.retry_count)
        .bind(entry.last_retry_at)
        .bind(entry.resolved_at)
        .bind(entry.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("reconciliation entry {}", entry.id)))?
            .into_domain()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReconciliationRow {
    id: Uuid,
    reservation_id: Uuid,
    payment_id: Option<Uuid>,
    kind: String,
    error_reason: String,
    retry_count: i32,
    created_at: DateTime<Utc>,
    last_retry_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationRow {
    fn into_domain(self) -> RepositoryResult<ReconciliationEntry> {
        Ok(ReconciliationEntry {
            id: self.id,
            reservation_id: self.reservation_id,
            payment_id: self.payment_id,
            kind: parse_column("reconciliation_entries.kind", &self.kind)?,
            error_reason: self.error_reason,
            retry_count: self.retry_count,
            created_at: self.created_at,
            last_retry_at: self.last_retry_at,
            resolved_at: self.resolved_at,
        })
    }
}
