use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::notification_message::{MessageStatus, NotificationMessage};

/// OutboxError はアウトボックスストア操作に関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// 冪等キーの一意制約違反
    #[error("idempotency key conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),
}

/// NotificationMessageRepository はアウトボックスの永続化インターフェース。
///
/// claim 系の操作は「対象行の選択」と「Processing への遷移」を
/// 単一のアトミックな操作として行う。複数のディスパッチャワーカーが
/// 同じストアに対して動いても、1 試行につき 1 ワーカーしか行を掴まない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationMessageRepository: Send + Sync {
    /// メッセージをアウトボックステーブルに追加する。
    /// 冪等キーが衝突した場合は `OutboxError::Conflict` を返す。
    async fn insert(&self, message: &NotificationMessage) -> Result<(), OutboxError>;

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationMessage>, OutboxError>;

    /// 配送対象の Pending 行（`scheduled_for` が未設定または経過済み）を
    /// `created_at` 昇順で最大 limit 件 claim し、Processing へ遷移して返す。
    async fn claim_pending(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError>;

    /// リトライ対象の Failed 行（試行上限未到達かつ `next_attempt_utc` が
    /// 未設定または経過済み）を `next_attempt_utc` 昇順（NULL は末尾）で
    /// 最大 limit 件 claim し、Processing へ遷移して返す。
    async fn claim_failed(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError>;

    /// claim 済みの行に試行結果（Sent / Failed / DeadLettered）を書き戻す。
    /// 行がもう Processing でない場合は何も書かず false を返す。
    async fn update_claimed(&self, message: &NotificationMessage) -> Result<bool, OutboxError>;

    /// 運用者による再投入。Failed / DeadLettered の行を Pending に戻す。
    /// 対象外ステータスの行には作用せず None を返す。
    async fn requeue(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError>;

    /// 直近のメッセージを `created_at` 降順で一覧する。
    async fn find_recent(
        &self,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<NotificationMessage>, OutboxError>;

    /// Processing のまま放置された行（可視性タイムアウト超過）を
    /// Pending に戻し、戻した件数を返す。
    async fn release_stuck(&self, older_than: Duration) -> Result<u64, OutboxError>;
}
