pub mod notification_message_memory;
pub mod notification_message_postgres;

pub use notification_message_memory::InMemoryNotificationMessageRepository;
pub use notification_message_postgres::PostgresNotificationMessageRepository;
