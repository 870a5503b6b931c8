pub mod notification_message_repository;

pub use notification_message_repository::{NotificationMessageRepository, OutboxError};

#[cfg(test)]
pub use notification_message_repository::MockNotificationMessageRepository;
