//! Telegram implementation of [`NotificationSink`].

use super::{NotificationSink, SinkError};
use crate::config::TELEGRAM_MESSAGE_LIMIT;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use teloxide::RequestError;
use tracing::debug;

/// Sends plain-text messages through the Telegram Bot API.
///
/// Transient failures are retried with backoff; API rejections are returned
/// immediately.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    /// Wraps an authenticated bot.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait::async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, destination: &Recipient, text: &str) -> Result<(), SinkError> {
        let text = fit_message(text);

        crate::utils::retry_telegram_operation(
            || async {
                self.bot
                    .send_message(destination.clone(), text.clone())
                    .await
                    .map(|_| ())
            },
            is_transient,
        )
        .await
        .map_err(into_sink_error)?;

        debug!("Message delivered to {:?}", destination);
        Ok(())
    }
}

/// Truncates text above the Telegram limit, marking the cut.
fn fit_message(text: &str) -> String {
    if text.chars().count() > TELEGRAM_MESSAGE_LIMIT {
        format!("{}…", crate::utils::truncate_str(text, TELEGRAM_MESSAGE_LIMIT))
    } else {
        text.to_string()
    }
}

/// Network trouble and flood control are worth retrying; API rejections are not.
fn is_transient(error: &RequestError) -> bool {
    !matches!(
        error,
        RequestError::Api(_) | RequestError::MigrateToChatId(_) | RequestError::InvalidJson { .. }
    )
}

fn into_sink_error(error: RequestError) -> SinkError {
    match error {
        RequestError::Api(e) => SinkError::Api(e.to_string()),
        RequestError::MigrateToChatId(id) => {
            SinkError::Api(format!("group was migrated to supergroup {}", id.0))
        }
        other => SinkError::Network(other.to_string()),
    }
}
