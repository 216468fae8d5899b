use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{parse_column, PostgresStore};
use crate::domain::Notification;
use crate::ports::{NotificationRepository, RepositoryError, RepositoryResult};

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, body, kind, reservation_id, read, created_at";

#[async_trait]
impl NotificationRepository for PostgresStore {
    async fn insert_notification(&self, notification: &Notification) -> RepositoryResult<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            INSERT INTO notifications ({NOTIFICATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.kind.as_str())
        .bind(notification.reservation_id)
        .bind(notification.read)
        .bind(notification.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> RepositoryResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR read = FALSE)
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            UPDATE notifications SET read = TRUE
            WHERE id = $1 AND user_id = $2
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("notification {}", id)))?
            .into_domain()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    body: String,
    kind: String,
    reservation_id: Option<Uuid>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_domain(self) -> RepositoryResult<Notification> {
        Ok(Notification {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            body: self.body,
            kind: parse_column("notifications.kind", &self.kind)?,
            reservation_id: self.reservation_id,
            read: self.read,
            created_at: self.created_at,
        })
    }
}
