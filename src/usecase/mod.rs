pub mod enqueue_notification;
pub mod get_notification;
pub mod requeue_notification;

pub use enqueue_notification::{
    EnqueueNotificationError, EnqueueNotificationInput, EnqueueNotificationOutput,
    EnqueueNotificationUseCase,
};
pub use get_notification::{GetNotificationError, GetNotificationUseCase};
pub use requeue_notification::{RequeueNotificationError, RequeueNotificationUseCase};
