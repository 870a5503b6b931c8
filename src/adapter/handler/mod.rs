pub mod health;
pub mod notification_handler;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::domain::repository::NotificationMessageRepository;
use crate::usecase::{
    EnqueueNotificationUseCase, GetNotificationUseCase, RequeueNotificationUseCase,
};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub enqueue_notification_uc: Arc<EnqueueNotificationUseCase>,
    pub get_notification_uc: Arc<GetNotificationUseCase>,
    pub requeue_notification_uc: Arc<RequeueNotificationUseCase>,
    pub message_repo: Arc<dyn NotificationMessageRepository>,
}

/// Build the REST API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/readyz", get(health::readyz))
        .route(
            "/notifications",
            post(notification_handler::enqueue_notification),
        )
        .route(
            "/notifications",
            get(notification_handler::list_notifications),
        )
        .route(
            "/notifications/:id",
            get(notification_handler::get_notification),
        )
        .route(
            "/notifications/:id/requeue",
            post(notification_handler::requeue_notification),
        )
        .with_state(state)
}
