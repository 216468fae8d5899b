//! Persisted notifications with an independent, best-effort push.
//!
//! `notify` never fails from the caller's point of view. Persistence is
//! retried with exponential backoff; push runs regardless of whether
//! persistence succeeded and its failure is only logged.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Notification, NotificationKind};
use crate::ports::{NotificationRepository, PushMessage, PushSender, RepositoryResult};

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub notification_id: Uuid,
    pub persisted: bool,
    pub persist_attempts: u32,
    pub pushed: bool,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    repo: Arc<dyn NotificationRepository>,
    push: Option<Arc<dyn PushSender>>,
    max_attempts: u32,
    retry_base: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        push: Option<Arc<dyn PushSender>>,
        max_attempts: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            repo,
            push,
            max_attempts: max_attempts.max(1),
            retry_base,
        }
    }

    pub async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: NotificationKind,
        reservation_id: Option<Uuid>,
    ) -> DeliveryReport {
        let notification = Notification::new(user_id, title, body, kind, reservation_id);
        let (persisted, persist_attempts) = self.persist(&notification).await;
        let pushed = self.push(&notification).await;

        DeliveryReport {
            notification_id: notification.id,
            persisted,
            persist_attempts,
            pushed,
        }
    }

    async fn persist(&self, notification: &Notification) -> (bool, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.repo.insert_notification(notification).await {
                Ok(_) => return (true, attempt),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.retry_base * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        notification_id = %notification.id,
                        attempt,
                        "Notification persist failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        user_id = %notification.user_id,
                        attempts = attempt,
                        "Notification could not be persisted: {}",
                        e
                    );
                    return (false, attempt);
                }
            }
        }
    }

    async fn push(&self, notification: &Notification) -> bool {
        let Some(push) = &self.push else {
            return false;
        };

        let message = PushMessage {
            user_id: notification.user_id,
            title: notification.title.clone(),
            body: notification.body.clone(),
            kind: notification.kind.as_str().to_string(),
        };
        match push.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    "Push delivery failed: {}",
                    e
                );
                false
            }
        }
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> RepositoryResult<Vec<Notification>> {
        self.repo.notifications_for(user_id, unread_only).await
    }

    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Notification> {
        self.repo.mark_notification_read(user_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PushError, RepositoryError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` inserts.
    struct FlakyRepo {
        failures: u32,
        calls: AtomicU32,
        stored: Mutex<Vec<Notification>>,
    }

    impl FlakyRepo {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationRepository for FlakyRepo {
        async fn insert_notification(&self, n: &Notification) -> RepositoryResult<Notification> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(RepositoryError::Database("connection reset".into()));
            }
            self.stored.lock().unwrap().push(n.clone());
            Ok(n.clone())
        }

        async fn notifications_for(&self, user_id: Uuid, _unread_only: bool) -> RepositoryResult<Vec<Notification>> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn mark_notification_read(&self, _user_id: Uuid, id: Uuid) -> RepositoryResult<Notification> {
            Err(RepositoryError::NotFound(id.to_string()))
        }
    }

    struct FailingPush;

    #[async_trait]
    impl PushSender for FailingPush {
        async fn send(&self, _message: &PushMessage) -> Result<(), PushError> {
            Err(PushError::Rejected(503))
        }
    }

    fn dispatcher(repo: Arc<FlakyRepo>, push: Option<Arc<dyn PushSender>>) -> NotificationDispatcher {
        NotificationDispatcher::new(repo, push, 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_persist_retries_transient_failures() {
        let repo = Arc::new(FlakyRepo::new(2));
        let user = Uuid::new_v4();
        let report = dispatcher(repo.clone(), None)
            .notify(user, "Approved", "Your reservation was approved", NotificationKind::Reservation, None)
            .await;

        assert!(report.persisted);
        assert_eq!(report.persist_attempts, 3);
        assert_eq!(repo.notifications_for(user, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let repo = Arc::new(FlakyRepo::new(10));
        let report = dispatcher(repo.clone(), None)
            .notify(Uuid::new_v4(), "t", "b", NotificationKind::System, None)
            .await;

        assert!(!report.persisted);
        assert_eq!(report.persist_attempts, 3);
        assert_eq!(repo.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_push_failure_does_not_affect_persistence() {
        let repo = Arc::new(FlakyRepo::new(0));
        let report = dispatcher(repo.clone(), Some(Arc::new(FailingPush)))
            .notify(Uuid::new_v4(), "t", "b", NotificationKind::Payment, None)
            .await;

        assert!(report.persisted);
        assert!(!report.pushed);
    }
}
