//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use teloxide::types::{ChatId, Recipient};
use tracing::Level;

use crate::poller::PollerConfig;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub tg_bot_token: Option<String>,
    /// Chat that receives review notifications (numeric id or `@channel`)
    pub chat_id: Option<String>,
    /// dvmn.org API token
    pub dvmn_token: Option<String>,

    /// Long-polling endpoint of the review service
    #[serde(default = "default_reviews_url")]
    pub reviews_url: String,
    /// How long a single long poll may wait for data
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// How long establishing a connection may take
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Pause applied after transport failures
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Consecutive connection failures tolerated before cooling down
    #[serde(default = "default_failure_streak_threshold")]
    pub failure_streak_threshold: u32,

    /// Forward warnings and errors to the notification chat
    #[serde(default)]
    pub log_to_telegram: bool,
    /// Minimum level of log records forwarded to Telegram
    #[serde(default = "default_telegram_log_level")]
    pub telegram_log_level: String,
}

fn default_reviews_url() -> String {
    DEFAULT_REVIEWS_URL.to_string()
}

const fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

const fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

const fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

const fn default_failure_streak_threshold() -> u32 {
    DEFAULT_FAILURE_STREAK_THRESHOLD
}

fn default_telegram_log_level() -> String {
    "warn".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use review_notifier::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP_COOLDOWN_SECS=30 ./target/app` would set the `cooldown_secs` key
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() maps TG_BOT_TOKEN to tg_bot_token;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the Telegram bot token.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the token is missing or blank.
    pub fn bot_token(&self) -> Result<&str, ConfigError> {
        match self.tg_bot_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ConfigError::Message("TG_BOT_TOKEN is not set".to_string())),
        }
    }

    /// Returns the notification destination.
    ///
    /// Numeric values are chat ids, `@name` values are public channels.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the destination is missing or malformed.
    pub fn chat_id(&self) -> Result<Recipient, ConfigError> {
        let raw = self
            .chat_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Message("CHAT_ID is not set".to_string()))?;

        if raw.starts_with('@') && raw.len() > 1 {
            return Ok(Recipient::ChannelUsername(raw.to_string()));
        }

        raw.parse::<i64>()
            .map(|id| Recipient::Id(ChatId(id)))
            .map_err(|_| ConfigError::Message(format!("CHAT_ID is not a chat id: {raw}")))
    }

    /// Returns the dvmn.org token, empty when not configured.
    #[must_use]
    pub fn dvmn_token(&self) -> &str {
        self.dvmn_token.as_deref().unwrap_or_default()
    }

    /// Read timeout for a single long poll.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Connection timeout for the review API.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Minimum level forwarded to Telegram; unknown names fall back to `WARN`.
    #[must_use]
    pub fn telegram_log_level(&self) -> Level {
        self.telegram_log_level
            .trim()
            .parse::<Level>()
            .unwrap_or(Level::WARN)
    }

    /// Backoff settings for the polling loop.
    #[must_use]
    pub const fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            failure_streak_threshold: self.failure_streak_threshold,
        }
    }
}

/// dvmn.org long-polling endpoint
pub const DEFAULT_REVIEWS_URL: &str = "https://dvmn.org/api/long_polling/";
/// Default long-poll read timeout in seconds
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 100;
/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default cooldown after transport failures in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 10;
/// Connection failures in a row tolerated before cooling down
pub const DEFAULT_FAILURE_STREAK_THRESHOLD: u32 = 10;

// Telegram API retry configuration
/// Maximum retry attempts for a Telegram API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single backoff in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Maximum message length sent to Telegram.
/// The official limit is 4096; a margin is kept for the truncation marker.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Log records waiting for delivery to the chat; newer records are dropped
/// once the queue is full.
pub const LOG_FORWARD_QUEUE_CAPACITY: usize = 64;
