use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::notification_message::{MessageStatus, NotificationMessage};
use crate::domain::repository::{NotificationMessageRepository, OutboxError};

/// InMemoryNotificationMessageRepository はプロセス内ストア実装。
///
/// データベース未設定時の開発用フォールバックと統合テストに使う。
/// claim はすべて write ロック内で行うため、Postgres 実装の
/// SKIP LOCKED と同じく 1 試行につき 1 ワーカーしか行を掴まない。
#[derive(Default)]
pub struct InMemoryNotificationMessageRepository {
    messages: RwLock<HashMap<Uuid, NotificationMessage>>,
}

impl InMemoryNotificationMessageRepository {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NotificationMessageRepository for InMemoryNotificationMessageRepository {
    async fn insert(&self, message: &NotificationMessage) -> Result<(), OutboxError> {
        let mut messages = self.messages.write().await;
        if messages
            .values()
            .any(|m| m.idempotency_key == message.idempotency_key)
        {
            return Err(OutboxError::Conflict(message.idempotency_key.clone()));
        }
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError> {
        let messages = self.messages.read().await;
        Ok(messages.get(id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationMessage>, OutboxError> {
        let messages = self.messages.read().await;
        Ok(messages.values().find(|m| m.idempotency_key == key).cloned())
    }

    async fn claim_pending(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;

        let mut eligible: Vec<Uuid> = messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Pending
                    && m.scheduled_for.map_or(true, |at| at <= now)
            })
            .map(|m| m.id)
            .collect();
        eligible.sort_by_key(|id| messages[id].created_at);
        eligible.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(m) = messages.get_mut(&id) {
                m.mark_processing();
                claimed.push(m.clone());
            }
        }
        Ok(claimed)
    }

    async fn claim_failed(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;

        let mut eligible: Vec<Uuid> = messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Failed
                    && m.can_retry()
                    && m.next_attempt_utc.map_or(true, |at| at <= now)
            })
            .map(|m| m.id)
            .collect();
        // next_attempt_utc 昇順、未設定は末尾（updated_at 順）
        eligible.sort_by_key(|id| {
            let m = &messages[id];
            (m.next_attempt_utc.is_none(), m.next_attempt_utc.unwrap_or(m.updated_at))
        });
        eligible.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(m) = messages.get_mut(&id) {
                m.mark_processing();
                claimed.push(m.clone());
            }
        }
        Ok(claimed)
    }

    async fn update_claimed(&self, message: &NotificationMessage) -> Result<bool, OutboxError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(&message.id) {
            Some(current) if current.status == MessageStatus::Processing => {
                *current = message.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(m)
                if matches!(
                    m.status,
                    MessageStatus::Failed | MessageStatus::DeadLettered
                ) =>
            {
                m.requeue();
                Ok(Some(m.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_recent(
        &self,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<NotificationMessage>, OutboxError> {
        let messages = self.messages.read().await;
        let mut found: Vec<NotificationMessage> = messages
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn release_stuck(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let now = Utc::now();
        let mut messages = self.messages.write().await;
        let mut released = 0u64;
        for m in messages.values_mut() {
            if m.status == MessageStatus::Processing && m.updated_at < cutoff {
                m.status = MessageStatus::Pending;
                m.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::push_provider::FailureCategory;

    fn make_message(key: &str) -> NotificationMessage {
        NotificationMessage::new(key, "fake", "token", "Title", "Body")
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let repo = InMemoryNotificationMessageRepository::new();
        repo.insert(&make_message("dup")).await.unwrap();

        let result = repo.insert(&make_message("dup")).await;
        assert!(matches!(result, Err(OutboxError::Conflict(key)) if key == "dup"));
    }

    #[tokio::test]
    async fn claim_pending_marks_processing() {
        let repo = InMemoryNotificationMessageRepository::new();
        let msg = make_message("a");
        repo.insert(&msg).await.unwrap();

        let claimed = repo.claim_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, MessageStatus::Processing);
        assert!(claimed[0].last_attempt_utc.is_some());

        // 二重 claim はできない
        assert!(repo.claim_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_pending_skips_future_scheduled_rows() {
        let repo = InMemoryNotificationMessageRepository::new();
        let mut msg = make_message("later");
        msg.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
        repo.insert(&msg).await.unwrap();

        assert!(repo.claim_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_pending_respects_creation_order_and_limit() {
        let repo = InMemoryNotificationMessageRepository::new();
        let mut first = make_message("first");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = make_message("second");
        repo.insert(&second).await.unwrap();
        repo.insert(&first).await.unwrap();

        let claimed = repo.claim_pending(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].idempotency_key, "first");
    }

    #[tokio::test]
    async fn claim_failed_waits_for_next_attempt() {
        let repo = InMemoryNotificationMessageRepository::new();
        let msg = make_message("f");
        let id = msg.id;
        repo.insert(&msg).await.unwrap();

        let mut claimed = repo.claim_pending(10).await.unwrap().remove(0);
        claimed.mark_failed(
            "boom",
            FailureCategory::ServiceUnavailable,
            Duration::from_secs(3600),
        );
        assert!(repo.update_claimed(&claimed).await.unwrap());

        // next_attempt_utc が未来なのでまだ対象外
        assert!(repo.claim_failed(10).await.unwrap().is_empty());

        // 経過済みにすると claim される
        claimed.next_attempt_utc = Some(Utc::now() - chrono::Duration::seconds(1));
        {
            let mut messages = repo.messages.write().await;
            messages.insert(id, claimed);
        }
        let reclaimed = repo.claim_failed(10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, MessageStatus::Processing);
    }

    #[tokio::test]
    async fn claim_failed_skips_exhausted_rows() {
        let repo = InMemoryNotificationMessageRepository::new();
        let mut msg = make_message("worn");
        msg.status = MessageStatus::Failed;
        msg.retry_count = 5;
        msg.max_retries = 5;
        repo.insert(&msg).await.unwrap();

        assert!(repo.claim_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_claimed_requires_processing() {
        let repo = InMemoryNotificationMessageRepository::new();
        let msg = make_message("g");
        repo.insert(&msg).await.unwrap();

        // Pending のままの行には書き戻せない
        let mut stale = msg.clone();
        stale.mark_sent();
        assert!(!repo.update_claimed(&stale).await.unwrap());

        let mut claimed = repo.claim_pending(10).await.unwrap().remove(0);
        claimed.mark_sent();
        assert!(repo.update_claimed(&claimed).await.unwrap());

        // 終端に入った行にも書き戻せない
        let mut late = claimed.clone();
        late.status = MessageStatus::Failed;
        assert!(!repo.update_claimed(&late).await.unwrap());
    }

    #[tokio::test]
    async fn requeue_only_touches_failed_or_dead_lettered() {
        let repo = InMemoryNotificationMessageRepository::new();
        let msg = make_message("r");
        let id = msg.id;
        repo.insert(&msg).await.unwrap();

        assert!(repo.requeue(&id).await.unwrap().is_none());

        let mut claimed = repo.claim_pending(10).await.unwrap().remove(0);
        claimed.mark_failed("gone", FailureCategory::InvalidToken, Duration::from_secs(1));
        repo.update_claimed(&claimed).await.unwrap();

        let requeued = repo.requeue(&id).await.unwrap().unwrap();
        assert_eq!(requeued.status, MessageStatus::Pending);
        assert_eq!(requeued.retry_count, 0);
    }

    #[tokio::test]
    async fn release_stuck_returns_old_processing_rows() {
        let repo = InMemoryNotificationMessageRepository::new();
        let msg = make_message("stuck");
        let id = msg.id;
        repo.insert(&msg).await.unwrap();
        repo.claim_pending(10).await.unwrap();

        // まだタイムアウトしていない
        assert_eq!(repo.release_stuck(Duration::from_secs(300)).await.unwrap(), 0);

        {
            let mut messages = repo.messages.write().await;
            messages.get_mut(&id).unwrap().updated_at = Utc::now() - chrono::Duration::seconds(600);
        }
        assert_eq!(repo.release_stuck(Duration::from_secs(300)).await.unwrap(), 1);
        assert_eq!(
            repo.find_by_id(&id).await.unwrap().unwrap().status,
            MessageStatus::Pending
        );
    }

    #[tokio::test]
    async fn find_recent_filters_by_status() {
        let repo = InMemoryNotificationMessageRepository::new();
        repo.insert(&make_message("one")).await.unwrap();
        let msg = make_message("two");
        let id = msg.id;
        repo.insert(&msg).await.unwrap();

        {
            let mut messages = repo.messages.write().await;
            let m = messages.get_mut(&id).unwrap();
            m.mark_processing();
            m.mark_sent();
        }

        let sent = repo
            .find_recent(Some(MessageStatus::Sent), 10)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, id);

        let all = repo.find_recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
