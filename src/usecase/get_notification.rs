use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::notification_message::NotificationMessage;
use crate::domain::repository::NotificationMessageRepository;

#[derive(Debug, thiserror::Error)]
pub enum GetNotificationError {
    #[error("notification not found: {0}")]
    NotFound(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

/// GetNotificationUseCase は id による読み取り専用のステータス参照。
pub struct GetNotificationUseCase {
    repo: Arc<dyn NotificationMessageRepository>,
}

impl GetNotificationUseCase {
    pub fn new(repo: Arc<dyn NotificationMessageRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: &Uuid) -> Result<NotificationMessage, GetNotificationError> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(|e| GetNotificationError::Internal(e.to_string()))?
            .ok_or(GetNotificationError::NotFound(*id))
    }
}
