use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::domain::entity::notification_message::{
    MessagePriority, MessageStatus, NotificationMessage,
};
use crate::domain::repository::NotificationMessageRepository;
use crate::usecase::enqueue_notification::EnqueueNotificationInput;
use crate::usecase::{
    EnqueueNotificationError, GetNotificationError, RequeueNotificationError,
};

/// POST /notifications - Enqueue a notification for asynchronous delivery
pub async fn enqueue_notification(
    State(state): State<AppState>,
    Json(req): Json<EnqueueNotificationRequest>,
) -> impl IntoResponse {
    let input = EnqueueNotificationInput {
        idempotency_key: req.idempotency_key,
        target_platform: req.target_platform.unwrap_or_default(),
        device_token: req.device_token.unwrap_or_default(),
        title: req.title.unwrap_or_default(),
        body: req.body.unwrap_or_default(),
        data: req.data,
        tags: req.tags.unwrap_or_default(),
        priority: req.priority.unwrap_or_default(),
        scheduled_for: req.scheduled_for,
    };

    match state.enqueue_notification_uc.execute(&input).await {
        Ok(output) => (
            StatusCode::ACCEPTED,
            Json(EnqueueNotificationResponse {
                id: output.id,
                status: output.status.as_str().to_string(),
                message: "notification accepted".to_string(),
            }),
        )
            .into_response(),
        Err(EnqueueNotificationError::Duplicate { id, status, .. }) => (
            StatusCode::CONFLICT,
            Json(EnqueueNotificationResponse {
                id,
                status: status.as_str().to_string(),
                message: "a notification with this idempotency key already exists".to_string(),
            }),
        )
            .into_response(),
        Err(EnqueueNotificationError::Validation(msg)) => {
            let err = ErrorResponse::new("NOTIF_VALIDATION_FAILED", &msg);
            (StatusCode::BAD_REQUEST, Json(err)).into_response()
        }
        Err(e) => {
            let err = ErrorResponse::new("NOTIF_ENQUEUE_FAILED", &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
        }
    }
}

/// GET /notifications/:id - Look up a single notification
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.get_notification_uc.execute(&id).await {
        Ok(message) => {
            (StatusCode::OK, Json(NotificationStatusResponse::from(&message))).into_response()
        }
        Err(GetNotificationError::NotFound(_)) => {
            let err = ErrorResponse::new(
                "NOTIF_NOT_FOUND",
                &format!("notification not found: {}", id),
            );
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
        Err(e) => {
            let err = ErrorResponse::new("NOTIF_GET_FAILED", &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
        }
    }
}

/// GET /notifications - List recent notifications (optional status filter)
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<ListNotificationsParams>,
) -> impl IntoResponse {
    let status = match &params.status {
        Some(raw) => match MessageStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                let err = ErrorResponse::new(
                    "NOTIF_INVALID_STATUS",
                    &format!("unknown status filter: {}", raw),
                );
                return (StatusCode::BAD_REQUEST, Json(err)).into_response();
            }
        },
        None => None,
    };
    let limit = params.limit.unwrap_or(50).min(200);

    match state.message_repo.find_recent(status, limit).await {
        Ok(messages) => {
            let notifications: Vec<NotificationStatusResponse> =
                messages.iter().map(NotificationStatusResponse::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "notifications": notifications })),
            )
                .into_response()
        }
        Err(e) => {
            let err = ErrorResponse::new("NOTIF_LIST_FAILED", &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
        }
    }
}

/// POST /notifications/:id/requeue - Operator requeue of a failed or
/// dead-lettered notification
pub async fn requeue_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.requeue_notification_uc.execute(&id).await {
        Ok(message) => {
            (StatusCode::OK, Json(NotificationStatusResponse::from(&message))).into_response()
        }
        Err(RequeueNotificationError::NotFound(_)) => {
            let err = ErrorResponse::new(
                "NOTIF_NOT_FOUND",
                &format!("notification not found: {}", id),
            );
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
        Err(e @ RequeueNotificationError::AlreadySent(_)) => {
            let err = ErrorResponse::new("NOTIF_ALREADY_SENT", &e.to_string());
            (StatusCode::CONFLICT, Json(err)).into_response()
        }
        Err(e @ RequeueNotificationError::NotRequeueable { .. }) => {
            let err = ErrorResponse::new("NOTIF_NOT_REQUEUEABLE", &e.to_string());
            (StatusCode::CONFLICT, Json(err)).into_response()
        }
        Err(e) => {
            let err = ErrorResponse::new("NOTIF_REQUEUE_FAILED", &e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
        }
    }
}

// --- Request / Response types ---

/// 取り込み JSON。フィールド名はワイヤ上では camelCase。
/// 必須フィールドの欠落は 400 で報告するため、ここではすべて Option で受ける。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueNotificationRequest {
    pub idempotency_key: Option<String>,
    pub target_platform: Option<String>,
    pub device_token: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<HashMap<String, String>>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<MessagePriority>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueNotificationResponse {
    pub id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationStatusResponse {
    pub id: Uuid,
    pub status: String,
    pub target_platform: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&NotificationMessage> for NotificationStatusResponse {
    fn from(message: &NotificationMessage) -> Self {
        Self {
            id: message.id,
            status: message.status.as_str().to_string(),
            target_platform: message.target_platform.clone(),
            retry_count: message.retry_count,
            created_at: message.created_at,
            sent_at: message.sent_at,
            error_message: message.last_error.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
