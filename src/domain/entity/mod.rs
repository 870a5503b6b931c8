pub mod notification_message;
