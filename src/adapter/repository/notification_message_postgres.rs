use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::notification_message::{
    MessagePriority, MessageStatus, NotificationMessage,
};
use crate::domain::repository::{NotificationMessageRepository, OutboxError};

const COLUMNS: &str = "id, idempotency_key, target_platform, device_token, title, body, data, \
     tags, priority, status, retry_count, max_retries, created_at, updated_at, scheduled_for, \
     sent_at, last_attempt_utc, next_attempt_utc, last_error, last_error_category";

/// PostgresNotificationMessageRepository は sqlx による永続ストア実装。
///
/// claim は CTE + `FOR UPDATE SKIP LOCKED` の単一ステートメントで
/// 「選択」と「Processing への遷移」を同一トランザクション内に収める。
/// 試行結果の書き戻しは `status = 'Processing'` を条件に持つ更新で、
/// 別ワーカーに奪われた行や終端化済みの行へは決して書かない。
pub struct PostgresNotificationMessageRepository {
    pool: Arc<PgPool>,
}

impl PostgresNotificationMessageRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationMessageRow {
    id: Uuid,
    idempotency_key: String,
    target_platform: String,
    device_token: String,
    title: String,
    body: String,
    data: Option<String>,
    tags: String,
    priority: String,
    status: String,
    retry_count: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_for: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    last_attempt_utc: Option<DateTime<Utc>>,
    next_attempt_utc: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_category: Option<String>,
}

impl From<NotificationMessageRow> for NotificationMessage {
    fn from(r: NotificationMessageRow) -> Self {
        NotificationMessage {
            id: r.id,
            idempotency_key: r.idempotency_key,
            target_platform: r.target_platform,
            device_token: r.device_token,
            title: r.title,
            body: r.body,
            data: r.data,
            tags: r.tags,
            priority: MessagePriority::parse(&r.priority).unwrap_or(MessagePriority::Normal),
            status: MessageStatus::parse(&r.status).unwrap_or(MessageStatus::Pending),
            retry_count: r.retry_count.max(0) as u32,
            max_retries: r.max_retries.max(0) as u32,
            created_at: r.created_at,
            updated_at: r.updated_at,
            scheduled_for: r.scheduled_for,
            sent_at: r.sent_at,
            last_attempt_utc: r.last_attempt_utc,
            next_attempt_utc: r.next_attempt_utc,
            last_error: r.last_error,
            last_error_category: r.last_error_category,
        }
    }
}

fn store_err(e: sqlx::Error) -> OutboxError {
    OutboxError::Store(e.to_string())
}

#[async_trait]
impl NotificationMessageRepository for PostgresNotificationMessageRepository {
    async fn insert(&self, message: &NotificationMessage) -> Result<(), OutboxError> {
        sqlx::query(
            "INSERT INTO notification.notification_messages \
             (id, idempotency_key, target_platform, device_token, title, body, data, tags, \
              priority, status, retry_count, max_retries, created_at, updated_at, scheduled_for, \
              sent_at, last_attempt_utc, next_attempt_utc, last_error, last_error_category) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                     $18, $19, $20)",
        )
        .bind(message.id)
        .bind(&message.idempotency_key)
        .bind(&message.target_platform)
        .bind(&message.device_token)
        .bind(&message.title)
        .bind(&message.body)
        .bind(&message.data)
        .bind(&message.tags)
        .bind(message.priority.as_str())
        .bind(message.status.as_str())
        .bind(message.retry_count as i32)
        .bind(message.max_retries as i32)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.scheduled_for)
        .bind(message.sent_at)
        .bind(message.last_attempt_utc)
        .bind(message.next_attempt_utc)
        .bind(&message.last_error)
        .bind(&message.last_error_category)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.code().as_deref() == Some("23505") {
                    return OutboxError::Conflict(message.idempotency_key.clone());
                }
            }
            store_err(e)
        })?;
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError> {
        let row: Option<NotificationMessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM notification.notification_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(row.map(Into::into))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<NotificationMessage>, OutboxError> {
        let row: Option<NotificationMessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM notification.notification_messages WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(row.map(Into::into))
    }

    async fn claim_pending(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError> {
        let rows: Vec<NotificationMessageRow> = sqlx::query_as(
            "WITH eligible AS ( \
                 SELECT id FROM notification.notification_messages \
                 WHERE status = 'Pending' \
                   AND (scheduled_for IS NULL OR scheduled_for <= NOW()) \
                 ORDER BY created_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE notification.notification_messages AS m \
             SET status = 'Processing', last_attempt_utc = NOW(), updated_at = NOW() \
             FROM eligible \
             WHERE m.id = eligible.id \
             RETURNING m.*",
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim_failed(&self, limit: u32) -> Result<Vec<NotificationMessage>, OutboxError> {
        let rows: Vec<NotificationMessageRow> = sqlx::query_as(
            "WITH eligible AS ( \
                 SELECT id FROM notification.notification_messages \
                 WHERE status = 'Failed' \
                   AND retry_count < max_retries \
                   AND (next_attempt_utc IS NULL OR next_attempt_utc <= NOW()) \
                 ORDER BY next_attempt_utc ASC NULLS LAST, updated_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE notification.notification_messages AS m \
             SET status = 'Processing', last_attempt_utc = NOW(), updated_at = NOW() \
             FROM eligible \
             WHERE m.id = eligible.id \
             RETURNING m.*",
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_claimed(&self, message: &NotificationMessage) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            "UPDATE notification.notification_messages \
             SET status = $2, retry_count = $3, sent_at = $4, next_attempt_utc = $5, \
                 last_error = $6, last_error_category = $7, updated_at = NOW() \
             WHERE id = $1 AND status = 'Processing'",
        )
        .bind(message.id)
        .bind(message.status.as_str())
        .bind(message.retry_count as i32)
        .bind(message.sent_at)
        .bind(message.next_attempt_utc)
        .bind(&message.last_error)
        .bind(&message.last_error_category)
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue(&self, id: &Uuid) -> Result<Option<NotificationMessage>, OutboxError> {
        let row: Option<NotificationMessageRow> = sqlx::query_as(
            "UPDATE notification.notification_messages \
             SET status = 'Pending', retry_count = 0, next_attempt_utc = NULL, \
                 last_error = NULL, last_error_category = NULL, updated_at = NOW() \
             WHERE id = $1 AND status IN ('Failed', 'DeadLettered') \
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(row.map(Into::into))
    }

    async fn find_recent(
        &self,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<NotificationMessage>, OutboxError> {
        let rows: Vec<NotificationMessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM notification.notification_messages \
             WHERE ($1::varchar IS NULL OR status = $1) \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn release_stuck(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            "UPDATE notification.notification_messages \
             SET status = 'Pending', updated_at = NOW() \
             WHERE status = 'Processing' \
               AND updated_at < NOW() - make_interval(secs => $1)",
        )
        .bind(older_than.as_secs_f64())
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
