use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entity::notification_message::{
    MessagePriority, MessageStatus, NotificationMessage,
};
use crate::domain::repository::{NotificationMessageRepository, OutboxError};

#[derive(Debug, Clone, Default)]
pub struct EnqueueNotificationInput {
    pub idempotency_key: Option<String>,
    pub target_platform: String,
    pub device_token: String,
    pub title: String,
    pub body: String,
    pub data: Option<HashMap<String, String>>,
    pub tags: Vec<String>,
    pub priority: MessagePriority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EnqueueNotificationOutput {
    pub id: Uuid,
    pub status: MessageStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueNotificationError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// 同じ冪等キーの行が既に存在する。既存行の id と状態を保持する。
    #[error("duplicate idempotency key: {key}")]
    Duplicate {
        key: String,
        id: Uuid,
        status: MessageStatus,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// EnqueueNotificationUseCase は取り込みエンドポイントの中身。
/// 入力を検証し、冪等性を強制して Pending 行を 1 件書き込む。
/// プロバイダを呼ぶことはない（純粋なアウトボックスへのライタ）。
pub struct EnqueueNotificationUseCase {
    repo: Arc<dyn NotificationMessageRepository>,
}

impl EnqueueNotificationUseCase {
    pub fn new(repo: Arc<dyn NotificationMessageRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(
        &self,
        input: &EnqueueNotificationInput,
    ) -> Result<EnqueueNotificationOutput, EnqueueNotificationError> {
        validate(input)?;

        // 冪等キーが省略された場合はサーバ側で生成する
        let idempotency_key = match &input.idempotency_key {
            Some(key) => key.clone(),
            None => Uuid::new_v4().to_string(),
        };

        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&idempotency_key)
            .await
            .map_err(|e| EnqueueNotificationError::Internal(e.to_string()))?
        {
            return Err(EnqueueNotificationError::Duplicate {
                key: idempotency_key,
                id: existing.id,
                status: existing.status,
            });
        }

        let mut message = NotificationMessage::new(
            idempotency_key.clone(),
            input.target_platform.trim(),
            input.device_token.clone(),
            input.title.clone(),
            input.body.clone(),
        );
        message.priority = input.priority;
        message.scheduled_for = input.scheduled_for;
        message.tags = input.tags.join(",");
        if let Some(data) = &input.data {
            message.data = Some(
                serde_json::to_string(data)
                    .map_err(|e| EnqueueNotificationError::Internal(e.to_string()))?,
            );
        }

        match self.repo.insert(&message).await {
            Ok(()) => Ok(EnqueueNotificationOutput {
                id: message.id,
                status: message.status,
            }),
            // 検査と挿入の間で別リクエストに先を越されたケース
            Err(OutboxError::Conflict(_)) => {
                let existing = self
                    .repo
                    .find_by_idempotency_key(&idempotency_key)
                    .await
                    .map_err(|e| EnqueueNotificationError::Internal(e.to_string()))?
                    .ok_or_else(|| {
                        EnqueueNotificationError::Internal(
                            "conflicting row disappeared during insert".to_string(),
                        )
                    })?;
                Err(EnqueueNotificationError::Duplicate {
                    key: idempotency_key,
                    id: existing.id,
                    status: existing.status,
                })
            }
            Err(e) => Err(EnqueueNotificationError::Internal(e.to_string())),
        }
    }
}

fn validate(input: &EnqueueNotificationInput) -> Result<(), EnqueueNotificationError> {
    if input.target_platform.trim().is_empty() {
        return Err(EnqueueNotificationError::Validation(
            "targetPlatform is required".to_string(),
        ));
    }
    if input.target_platform.len() > 50 {
        return Err(EnqueueNotificationError::Validation(
            "targetPlatform must be at most 50 characters".to_string(),
        ));
    }
    if input.device_token.trim().is_empty() {
        return Err(EnqueueNotificationError::Validation(
            "deviceToken is required".to_string(),
        ));
    }
    if input.device_token.len() > 1024 {
        return Err(EnqueueNotificationError::Validation(
            "deviceToken must be at most 1024 characters".to_string(),
        ));
    }
    if input.title.trim().is_empty() {
        return Err(EnqueueNotificationError::Validation(
            "title is required".to_string(),
        ));
    }
    if input.title.len() > 512 {
        return Err(EnqueueNotificationError::Validation(
            "title must be at most 512 characters".to_string(),
        ));
    }
    if input.body.len() > 4096 {
        return Err(EnqueueNotificationError::Validation(
            "body must be at most 4096 characters".to_string(),
        ));
    }
    if let Some(key) = &input.idempotency_key {
        if key.is_empty() {
            return Err(EnqueueNotificationError::Validation(
                "idempotencyKey must not be empty when provided".to_string(),
            ));
        }
        if key.len() > 256 {
            return Err(EnqueueNotificationError::Validation(
                "idempotencyKey must be at most 256 characters".to_string(),
            ));
        }
    }
    if input.tags.join(",").len() > 1024 {
        return Err(EnqueueNotificationError::Validation(
            "tags must be at most 1024 characters in total".to_string(),
        ));
    }
    Ok(())
}
