//! Notification delivery.
//!
//! The polling loop and the log forwarder only see [`NotificationSink`];
//! [`TelegramSink`] is the production implementation.

/// Telegram Bot API sink
pub mod sink;

pub use sink::TelegramSink;

use teloxide::types::Recipient;
use thiserror::Error;

/// Error returned when a message could not be delivered
#[derive(Debug, Error)]
pub enum SinkError {
    /// The messaging API rejected the request
    #[error("API error: {0}")]
    Api(String),
    /// The messaging API could not be reached
    #[error("Network error: {0}")]
    Network(String),
}

/// Destination for outgoing text messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers `text` to `destination`.
    ///
    /// Handling a failure (retry or drop) is up to the caller.
    async fn deliver(&self, destination: &Recipient, text: &str) -> Result<(), SinkError>;
}
