use proptest::prelude::*;
use review_notifier::bot::{NotificationSink, SinkError};
use review_notifier::poller::{Poller, PollerConfig};
use review_notifier::review::{Cursor, PollOutcome, PollResponse, ReviewAttempt, ReviewSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::{ChatId, Recipient};
use tokio::time::Instant;

const COOLDOWN: Duration = Duration::from_secs(10);
const THRESHOLD: u32 = 10;

struct ScriptedSource(Mutex<VecDeque<PollOutcome>>);

#[async_trait::async_trait]
impl ReviewSource for ScriptedSource {
    async fn poll(&self, _cursor: Cursor) -> PollOutcome {
        self.0
            .lock()
            .ok()
            .and_then(|mut o| o.pop_front())
            .unwrap_or(PollOutcome::ReadTimeout)
    }
}

#[derive(Default)]
struct CountingSink(AtomicUsize);

#[async_trait::async_trait]
impl NotificationSink for CountingSink {
    async fn deliver(&self, _destination: &Recipient, _text: &str) -> Result<(), SinkError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn outcome() -> impl Strategy<Value = PollOutcome> {
    let attempt = (any::<bool>(), "[A-Za-z ]{1,12}").prop_map(|(is_negative, title)| ReviewAttempt {
        is_negative,
        lesson_url: format!("http://x/{}", title.trim()),
        lesson_title: title,
    });

    prop_oneof![
        8 => Just(PollOutcome::Connectivity("connection refused".to_string())),
        2 => (0u32..1_000_000).prop_map(|ts| PollOutcome::Response(PollResponse::Timeout {
            timestamp_to_request: f64::from(ts),
        })),
        2 => ((0u32..1_000_000), prop::collection::vec(attempt, 0..4)).prop_map(|(ts, attempts)| {
            PollOutcome::Response(PollResponse::Found {
                last_attempt_timestamp: f64::from(ts),
                new_attempts: attempts,
            })
        }),
        1 => Just(PollOutcome::Response(PollResponse::Unrecognized)),
        1 => Just(PollOutcome::Rejected { status: 503, body: String::new() }),
        1 => Just(PollOutcome::Malformed("expected value".to_string())),
        1 => Just(PollOutcome::Failed("invalid chunk".to_string())),
        2 => Just(PollOutcome::ReadTimeout),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
    {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {e}"),
    }
}

proptest! {
    /// Cursor follows the last timeout/found response, the failure streak
    /// equals the trailing run of connection failures, and pauses happen
    /// exactly when the streak is above the threshold or on other failures.
    #[test]
    fn cursor_and_streak_track_outcomes(script in prop::collection::vec(outcome(), 1..60)) {
        let rt = runtime();
        rt.block_on(async {
            let source = Arc::new(ScriptedSource(Mutex::new(script.iter().cloned().collect())));
            let sink = Arc::new(CountingSink::default());
            let mut poller = Poller::new(
                source,
                Arc::clone(&sink) as Arc<dyn NotificationSink>,
                Recipient::Id(ChatId(1)),
                PollerConfig { cooldown: COOLDOWN, failure_streak_threshold: THRESHOLD },
            );

            let mut expected_cursor = Cursor::unset();
            let mut expected_streak = 0u32;
            let mut expected_deliveries = 0usize;

            for outcome in &script {
                let expect_pause = match outcome {
                    PollOutcome::Connectivity(_) => {
                        expected_streak += 1;
                        expected_streak > THRESHOLD
                    }
                    PollOutcome::ReadTimeout => false,
                    PollOutcome::Failed(_) | PollOutcome::Malformed(_) => {
                        expected_streak = 0;
                        true
                    }
                    PollOutcome::Response(response) => {
                        expected_streak = 0;
                        if let Some(next) = response.next_cursor() {
                            expected_cursor.advance(next);
                        }
                        if let PollResponse::Found { new_attempts, .. } = response {
                            expected_deliveries += new_attempts.len();
                        }
                        false
                    }
                    PollOutcome::Rejected { .. } => {
                        expected_streak = 0;
                        false
                    }
                };

                let start = Instant::now();
                poller.poll_once().await;
                let paused = start.elapsed() >= COOLDOWN;

                prop_assert_eq!(paused, expect_pause);
                prop_assert_eq!(poller.failure_streak(), expected_streak);
                prop_assert_eq!(poller.cursor(), expected_cursor);
            }

            prop_assert_eq!(sink.0.load(Ordering::SeqCst), expected_deliveries);
            Ok(())
        })?;
    }
}
