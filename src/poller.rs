//! The long-polling loop.
//!
//! [`Poller`] keeps the review cursor and a count of consecutive connection
//! failures. Each iteration issues one long poll, delivers a notification for
//! every finished review in server order, and decides whether to pause before
//! the next request:
//!
//! | outcome              | cursor   | failure streak | pause                     |
//! |----------------------|----------|----------------|---------------------------|
//! | read timeout         | kept     | kept           | none                      |
//! | connectivity failure | kept     | +1             | cooldown once above limit |
//! | other failure        | kept     | reset          | cooldown                  |
//! | HTTP error status    | kept     | reset          | none                      |
//! | malformed body       | kept     | reset          | cooldown                  |
//! | `timeout` / `found`  | advanced | reset          | none                      |
//! | unknown `status`     | kept     | reset          | none                      |

use crate::bot::NotificationSink;
use crate::config::{DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_STREAK_THRESHOLD};
use crate::review::{render_attempt, Cursor, PollOutcome, PollResponse, ReviewAttempt, ReviewSource};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::Recipient;
use tracing::{debug, error, info, warn};

/// Backoff settings for [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause applied after transport failures
    pub cooldown: Duration,
    /// Connection failures in a row tolerated without a pause
    pub failure_streak_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            failure_streak_threshold: DEFAULT_FAILURE_STREAK_THRESHOLD,
        }
    }
}

/// Turns a finished review into notification text.
pub type Renderer = Box<dyn Fn(&ReviewAttempt) -> String + Send + Sync>;

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The long poll timed out locally with no data.
    Idle,
    /// The server could not be reached.
    ConnectionLost {
        /// Consecutive connection failures including this one
        streak: u32,
        /// Whether the cooldown was applied
        cooled_down: bool,
    },
    /// An unexpected transport failure; the cooldown was applied.
    Failed,
    /// The server answered with a non-success status.
    Rejected,
    /// The server answered with a body that could not be parsed; the cooldown
    /// was applied.
    Malformed,
    /// The server had nothing new; the cursor was advanced.
    NoReviews,
    /// Reviews arrived; the cursor was advanced.
    Reviews {
        /// Notifications delivered
        delivered: usize,
        /// Notifications that could not be delivered
        failed: usize,
    },
    /// The server answered with an unknown `status`.
    Unrecognized,
}

/// Long-polls the review API and forwards finished reviews.
pub struct Poller {
    source: Arc<dyn ReviewSource>,
    sink: Arc<dyn NotificationSink>,
    destination: Recipient,
    render: Renderer,
    config: PollerConfig,
    cursor: Cursor,
    failure_streak: u32,
}

impl Poller {
    /// Creates a poller starting from an unset cursor.
    #[must_use]
    pub fn new(
        source: Arc<dyn ReviewSource>,
        sink: Arc<dyn NotificationSink>,
        destination: Recipient,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            sink,
            destination,
            render: Box::new(render_attempt),
            config,
            cursor: Cursor::unset(),
            failure_streak: 0,
        }
    }

    /// Replaces the notification text renderer.
    #[must_use]
    pub fn with_renderer(
        mut self,
        render: impl Fn(&ReviewAttempt) -> String + Send + Sync + 'static,
    ) -> Self {
        self.render = Box::new(render);
        self
    }

    /// Current cursor.
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Consecutive connection failures so far.
    #[must_use]
    pub const fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Polls forever. Only returns if the task is cancelled from outside.
    pub async fn run(mut self) {
        info!(cursor = %self.cursor, "Polling for reviews");
        loop {
            let step = self.poll_once().await;
            debug!(?step, cursor = %self.cursor, streak = self.failure_streak, "Poll finished");
        }
    }

    /// Performs one iteration: a single request, its notifications and any
    /// cooldown that must pass before the next request.
    pub async fn poll_once(&mut self) -> Step {
        match self.source.poll(self.cursor).await {
            PollOutcome::ReadTimeout => {
                debug!("Long poll timed out without data");
                Step::Idle
            }
            PollOutcome::Connectivity(reason) => {
                self.failure_streak = self.failure_streak.saturating_add(1);
                warn!(streak = self.failure_streak, "Connection failure: {}", reason);

                let cooled_down = self.failure_streak > self.config.failure_streak_threshold;
                if cooled_down {
                    self.cool_down().await;
                }
                Step::ConnectionLost {
                    streak: self.failure_streak,
                    cooled_down,
                }
            }
            PollOutcome::Failed(reason) => {
                // The request did complete, just not in a way we understand
                self.failure_streak = 0;
                error!("Something went wrong while polling: {}", reason);
                self.cool_down().await;
                Step::Failed
            }
            PollOutcome::Rejected { status, body } => {
                self.failure_streak = 0;
                error!(status, "Bad request: {}", body);
                Step::Rejected
            }
            PollOutcome::Malformed(reason) => {
                self.failure_streak = 0;
                error!("Malformed response: {}", reason);
                self.cool_down().await;
                Step::Malformed
            }
            PollOutcome::Response(response) => {
                self.failure_streak = 0;
                self.handle_response(response).await
            }
        }
    }

    async fn handle_response(&mut self, response: PollResponse) -> Step {
        match response {
            PollResponse::Timeout {
                timestamp_to_request,
            } => {
                self.cursor.advance(timestamp_to_request);
                info!(cursor = %self.cursor, "Server timeout received");
                Step::NoReviews
            }
            PollResponse::Found {
                last_attempt_timestamp,
                new_attempts,
            } => {
                self.cursor.advance(last_attempt_timestamp);
                info!(
                    cursor = %self.cursor,
                    count = new_attempts.len(),
                    "Review found"
                );
                self.notify(&new_attempts).await
            }
            PollResponse::Unrecognized => {
                warn!("Unrecognized response");
                Step::Unrecognized
            }
        }
    }

    /// Delivers one notification per attempt, strictly in order.
    async fn notify(&self, attempts: &[ReviewAttempt]) -> Step {
        let mut delivered = 0;
        let mut failed = 0;

        for attempt in attempts {
            let text = (self.render)(attempt);
            match self.sink.deliver(&self.destination, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    error!(
                        lesson = %attempt.lesson_title,
                        "Failed to deliver review notification: {}", e
                    );
                }
            }
        }

        Step::Reviews { delivered, failed }
    }

    async fn cool_down(&self) {
        warn!("Cooling down for {:?}", self.config.cooldown);
        tokio::time::sleep(self.config.cooldown).await;
    }
}
