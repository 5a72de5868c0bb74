#![deny(missing_docs)]
//! Review notifier library.
//!
//! Long-polls the dvmn.org review API and forwards finished reviews to a
//! Telegram chat.

/// Telegram delivery sink.
pub mod bot;
/// Configuration management.
pub mod config;
/// Logging setup and Telegram log routing.
pub mod logging;
/// The long-polling loop.
pub mod poller;
/// Review API model, client and message rendering.
pub mod review;
/// Utility functions.
pub mod utils;
