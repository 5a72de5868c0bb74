use review_notifier::bot::{NotificationSink, SinkError};
use review_notifier::poller::{Poller, PollerConfig, Step};
use review_notifier::review::{
    Cursor, DvmnClient, PollOutcome, PollResponse, ReviewAttempt, ReviewSource,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::{ChatId, Recipient};
use wiremock::matchers::{method, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Replays canned outcomes and records the cursor of every request.
struct ScriptedSource {
    outcomes: Mutex<VecDeque<PollOutcome>>,
    requested: Mutex<Vec<Cursor>>,
}

impl ScriptedSource {
    fn new(outcomes: impl IntoIterator<Item = PollOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<Cursor> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ReviewSource for ScriptedSource {
    async fn poll(&self, cursor: Cursor) -> PollOutcome {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(cursor);
        }
        let next = self.outcomes.lock().ok().and_then(|mut o| o.pop_front());
        match next {
            Some(outcome) => outcome,
            None => {
                // Script exhausted: behave like an idle long poll
                tokio::time::sleep(Duration::from_secs(100)).await;
                PollOutcome::ReadTimeout
            }
        }
    }
}

/// Records delivered texts; fails deliveries whose text contains `fail_on`.
#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingSink {
    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, _destination: &Recipient, text: &str) -> Result<(), SinkError> {
        if self.fail_on.is_some_and(|needle| text.contains(needle)) {
            return Err(SinkError::Api("Forbidden: bot was blocked by the user".to_string()));
        }
        // Yield so an overlapping delivery would interleave
        tokio::task::yield_now().await;
        self.delivered
            .lock()
            .map_err(|e| SinkError::Network(e.to_string()))?
            .push(text.to_string());
        Ok(())
    }
}

fn attempt(title: &str, is_negative: bool) -> ReviewAttempt {
    ReviewAttempt {
        is_negative,
        lesson_title: title.to_string(),
        lesson_url: format!("http://x/{title}"),
    }
}

fn poller(source: Arc<ScriptedSource>, sink: Arc<RecordingSink>) -> Poller {
    Poller::new(
        source,
        sink,
        Recipient::Id(ChatId(42)),
        PollerConfig::default(),
    )
}

#[tokio::test]
async fn found_then_timeout_scenario() {
    let source = Arc::new(ScriptedSource::new([
        PollOutcome::Response(PollResponse::Found {
            last_attempt_timestamp: 1000.0,
            new_attempts: vec![ReviewAttempt {
                is_negative: false,
                lesson_title: "L1".to_string(),
                lesson_url: "http://x/1".to_string(),
            }],
        }),
        PollOutcome::Response(PollResponse::Timeout {
            timestamp_to_request: 1050.0,
        }),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let mut poller = poller(Arc::clone(&source), Arc::clone(&sink));

    poller.poll_once().await;
    assert_eq!(poller.cursor(), Cursor::at(1000.0));
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].contains("L1"));
    assert!(delivered[0].contains("http://x/1"));
    assert!(delivered[0].contains("всё понравилось"));

    poller.poll_once().await;
    assert_eq!(poller.cursor(), Cursor::at(1050.0));
    assert_eq!(sink.delivered().len(), 1);

    assert_eq!(source.requested(), [Cursor::unset(), Cursor::at(1000.0)]);
}

#[tokio::test]
async fn repeated_timeout_is_idempotent() {
    let timeout = PollOutcome::Response(PollResponse::Timeout {
        timestamp_to_request: 1050.0,
    });
    let source = Arc::new(ScriptedSource::new([timeout.clone(), timeout]));
    let sink = Arc::new(RecordingSink::default());
    let mut poller = poller(Arc::clone(&source), Arc::clone(&sink));

    for _ in 0..2 {
        assert_eq!(poller.poll_once().await, Step::NoReviews);
        assert_eq!(poller.cursor(), Cursor::at(1050.0));
        assert!(sink.delivered().is_empty());
    }
    assert_eq!(source.requested(), [Cursor::unset(), Cursor::at(1050.0)]);
}

#[tokio::test]
async fn deliveries_follow_server_order() {
    let source = Arc::new(ScriptedSource::new([PollOutcome::Response(
        PollResponse::Found {
            last_attempt_timestamp: 7.0,
            new_attempts: vec![attempt("A", true), attempt("B", false), attempt("C", true)],
        },
    )]));
    let sink = Arc::new(RecordingSink::default());
    let mut poller = poller(source, Arc::clone(&sink));

    poller.poll_once().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 3);
    for (text, (title, negative)) in delivered.iter().zip([("A", true), ("B", false), ("C", true)]) {
        assert!(text.contains(&format!("«{title}»")));
        assert!(text.contains(&format!("http://x/{title}")));
        assert_eq!(text.contains("найдены ошибки"), negative);
    }
}

#[tokio::test]
async fn failed_delivery_is_skipped_not_fatal() {
    let source = Arc::new(ScriptedSource::new([
        PollOutcome::Response(PollResponse::Found {
            last_attempt_timestamp: 3.0,
            new_attempts: vec![attempt("A", false), attempt("B", false)],
        }),
        PollOutcome::Response(PollResponse::Found {
            last_attempt_timestamp: 4.0,
            new_attempts: vec![attempt("C", false)],
        }),
    ]));
    let sink = Arc::new(RecordingSink {
        fail_on: Some("«A»"),
        ..RecordingSink::default()
    });
    let mut poller = poller(source, Arc::clone(&sink));

    assert_eq!(
        poller.poll_once().await,
        Step::Reviews {
            delivered: 1,
            failed: 1
        }
    );
    poller.poll_once().await;

    assert_eq!(poller.cursor(), Cursor::at(4.0));
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered[0].contains("«B»"));
    assert!(delivered[1].contains("«C»"));
}

#[tokio::test(start_paused = true)]
async fn run_keeps_polling_through_failures() {
    let mut script = vec![
        PollOutcome::Connectivity("dns error".to_string()),
        PollOutcome::Failed("invalid chunk".to_string()),
        PollOutcome::Rejected {
            status: 500,
            body: String::new(),
        },
        PollOutcome::Response(PollResponse::Unrecognized),
    ];
    script.push(PollOutcome::Response(PollResponse::Found {
        last_attempt_timestamp: 9.0,
        new_attempts: vec![attempt("A", false)],
    }));
    let source = Arc::new(ScriptedSource::new(script));
    let sink = Arc::new(RecordingSink::default());

    let handle = tokio::spawn(poller(Arc::clone(&source), Arc::clone(&sink)).run());
    // Virtual time: long enough for the cooldown after the failure
    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.abort();

    assert_eq!(sink.delivered().len(), 1);
    let requested = source.requested();
    assert!(requested.len() > 5);
    // Every request before the found response used the unset cursor
    assert!(requested[..5].iter().all(|c| *c == Cursor::unset()));
    assert_eq!(requested[5], Cursor::at(9.0));
}

#[tokio::test]
async fn full_stack_against_http_server() -> Result<(), reqwest::Error> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param_is_missing("timestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "found",
            "last_attempt_timestamp": 1000,
            "new_attempts": [
                {"is_negative": false, "lesson_title": "L1", "lesson_url": "http://x/1"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("timestamp", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "timeout",
            "timestamp_to_request": 1050
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DvmnClient::new(
        server.uri(),
        "secret",
        Duration::from_secs(5),
        Duration::from_secs(2),
    )?;
    let sink = Arc::new(RecordingSink::default());
    let mut poller = Poller::new(
        Arc::new(client),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Recipient::Id(ChatId(42)),
        PollerConfig::default(),
    );

    assert_eq!(
        poller.poll_once().await,
        Step::Reviews {
            delivered: 1,
            failed: 0
        }
    );
    assert_eq!(poller.cursor(), Cursor::at(1000.0));
    assert_eq!(poller.poll_once().await, Step::NoReviews);
    assert_eq!(poller.cursor(), Cursor::at(1050.0));

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].contains("L1") && delivered[0].contains("http://x/1"));
    Ok(())
}
