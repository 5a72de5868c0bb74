//! Review API data model.
//!
//! The review service answers every long poll with a JSON object tagged by
//! its `status` field. Two statuses carry the timestamp to send with the
//! next request; everything else is reported as [`PollResponse::Unrecognized`].

pub mod client;
pub mod render;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

pub use client::{DvmnClient, PollOutcome, ReviewSource};
pub use render::render_attempt;

/// Position in the server-side review history already observed.
///
/// Unset on startup, which asks the server for the whole current backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cursor(Option<f64>);

impl Cursor {
    /// A cursor that has not seen any response yet.
    #[must_use]
    pub const fn unset() -> Self {
        Self(None)
    }

    /// A cursor positioned at `timestamp`.
    #[must_use]
    pub const fn at(timestamp: f64) -> Self {
        Self(Some(timestamp))
    }

    /// Moves the cursor to the timestamp provided by the server.
    pub fn advance(&mut self, next: f64) {
        self.0 = Some(next);
    }

    /// Raw timestamp, `None` while unset.
    #[must_use]
    pub const fn timestamp(&self) -> Option<f64> {
        self.0
    }

    /// Value of the `timestamp` query parameter, omitted while unset.
    #[must_use]
    pub fn as_query(&self) -> Option<String> {
        self.0.map(|ts| ts.to_string())
    }

    /// Cursor as a UTC date, for log lines.
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let ts = self.0?;
        if !ts.is_finite() {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let secs = ts.floor() as i64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = ((ts - ts.floor()) * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos.min(999_999_999))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.as_datetime()) {
            (None, _) => f.write_str("unset"),
            (Some(ts), Some(at)) => write!(f, "{ts} ({})", at.format("%Y-%m-%d %H:%M:%S UTC")),
            (Some(ts), None) => write!(f, "{ts}"),
        }
    }
}

/// One graded submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewAttempt {
    /// `true` when the reviewer found problems
    pub is_negative: bool,
    /// Lesson title as shown on the site
    pub lesson_title: String,
    /// Absolute link to the lesson
    pub lesson_url: String,
}

/// Body of a successful long-poll response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollResponse {
    /// Nothing new arrived while the server held the request.
    Timeout {
        /// Timestamp to send with the next request
        timestamp_to_request: f64,
    },
    /// One or more reviews finished.
    Found {
        /// Timestamp to send with the next request
        last_attempt_timestamp: f64,
        /// Finished reviews, oldest first
        new_attempts: Vec<ReviewAttempt>,
    },
    /// Any other `status` value.
    #[serde(other)]
    Unrecognized,
}

impl PollResponse {
    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns an error when the body is not JSON, has no `status`, or lacks
    /// the fields its `status` requires.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Cursor value the server asks for on the next request.
    #[must_use]
    pub const fn next_cursor(&self) -> Option<f64> {
        match self {
            Self::Timeout {
                timestamp_to_request,
            } => Some(*timestamp_to_request),
            Self::Found {
                last_attempt_timestamp,
                ..
            } => Some(*last_attempt_timestamp),
            Self::Unrecognized => None,
        }
    }
}
