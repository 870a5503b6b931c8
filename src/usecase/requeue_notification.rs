use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::notification_message::{MessageStatus, NotificationMessage};
use crate::domain::repository::NotificationMessageRepository;

#[derive(Debug, thiserror::Error)]
pub enum RequeueNotificationError {
    #[error("notification not found: {0}")]
    NotFound(Uuid),

    #[error("notification already sent: {0}")]
    AlreadySent(Uuid),

    #[error("notification is not requeueable in status {status}: {id}")]
    NotRequeueable { id: Uuid, status: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

/// RequeueNotificationUseCase は運用者による手動再投入。
/// Failed / DeadLettered の行をリトライ状態をリセットして Pending に戻す。
pub struct RequeueNotificationUseCase {
    repo: Arc<dyn NotificationMessageRepository>,
}

impl RequeueNotificationUseCase {
    pub fn new(repo: Arc<dyn NotificationMessageRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: &Uuid) -> Result<NotificationMessage, RequeueNotificationError> {
        let message = self
            .repo
            .find_by_id(id)
            .await
            .map_err(|e| RequeueNotificationError::Internal(e.to_string()))?
            .ok_or(RequeueNotificationError::NotFound(*id))?;

        match message.status {
            MessageStatus::Sent => return Err(RequeueNotificationError::AlreadySent(*id)),
            MessageStatus::Pending | MessageStatus::Processing => {
                return Err(RequeueNotificationError::NotRequeueable {
                    id: *id,
                    status: message.status.as_str(),
                })
            }
            MessageStatus::Failed | MessageStatus::DeadLettered => {}
        }

        // ステータス条件付き更新。並行する状態変化に負けたら対象外扱い。
        self.repo
            .requeue(id)
            .await
            .map_err(|e| RequeueNotificationError::Internal(e.to_string()))?
            .ok_or(RequeueNotificationError::NotRequeueable {
                id: *id,
                status: message.status.as_str(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::repository::MockNotificationMessageRepository;
    use crate::domain::service::push_provider::FailureCategory;

    fn dead_lettered() -> NotificationMessage {
        let mut msg = NotificationMessage::new("k", "fake", "t", "T", "B");
        msg.mark_failed("boom", FailureCategory::InvalidToken, Duration::from_secs(1));
        msg
    }

    #[tokio::test]
    async fn success() {
        let msg = dead_lettered();
        let msg_id = msg.id;
        let found = msg.clone();
        let mut requeued = msg.clone();
        requeued.requeue();

        let mut repo = MockNotificationMessageRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(found.clone())));
        repo.expect_requeue()
            .withf(move |id| *id == msg_id)
            .returning(move |_| Ok(Some(requeued.clone())));

        let uc = RequeueNotificationUseCase::new(Arc::new(repo));
        let result = uc.execute(&msg_id).await.unwrap();
        assert_eq!(result.status, MessageStatus::Pending);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn not_found() {
        let mut repo = MockNotificationMessageRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));

        let uc = RequeueNotificationUseCase::new(Arc::new(repo));
        let missing = Uuid::new_v4();
        assert!(matches!(
            uc.execute(&missing).await.unwrap_err(),
            RequeueNotificationError::NotFound(id) if id == missing
        ));
    }

    #[tokio::test]
    async fn already_sent() {
        let mut msg = NotificationMessage::new("k", "fake", "t", "T", "B");
        msg.mark_sent();
        let msg_id = msg.id;
        let found = msg.clone();

        let mut repo = MockNotificationMessageRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(found.clone())));

        let uc = RequeueNotificationUseCase::new(Arc::new(repo));
        assert!(matches!(
            uc.execute(&msg_id).await.unwrap_err(),
            RequeueNotificationError::AlreadySent(_)
        ));
    }

    #[tokio::test]
    async fn pending_is_not_requeueable() {
        let msg = NotificationMessage::new("k", "fake", "t", "T", "B");
        let msg_id = msg.id;
        let found = msg.clone();

        let mut repo = MockNotificationMessageRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(found.clone())));

        let uc = RequeueNotificationUseCase::new(Arc::new(repo));
        assert!(matches!(
            uc.execute(&msg_id).await.unwrap_err(),
            RequeueNotificationError::NotRequeueable { .. }
        ));
    }
}
