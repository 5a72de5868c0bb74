//! Logging setup.
//!
//! All diagnostics go through `tracing`. Records are written to stderr with
//! secrets masked, and, when enabled, records at or above a configured level
//! are also forwarded to the notification chat by [`TelegramLogLayer`].

#![allow(clippy::non_std_lazy_statics)]

use crate::bot::NotificationSink;
use crate::config::{LOG_FORWARD_QUEUE_CAPACITY, TELEGRAM_MESSAGE_LIMIT};
use lazy_regex::lazy_regex;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use teloxide::types::Recipient;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{prelude::*, EnvFilter, Layer};

/// Target used by the forwarder for its own diagnostics.
///
/// Records with this target never reach Telegram.
pub const LOG_FORWARD_TARGET: &str = "review_notifier::log_forward";

/// Crates whose records are never forwarded; they run inside delivery itself.
const TRANSPORT_TARGETS: &[&str] = &["teloxide", "reqwest", "hyper", "h2", "rustls", "tokio_retry"];

/// Bot token inside an API URL: https://api.telegram.org/bot<TOKEN>/
static RE_TG_TOKEN_URL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)");

/// Bare bot token
static RE_TG_TOKEN: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}");

/// `Authorization: Token <secret>` value
static RE_API_TOKEN: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(Token\s+)[A-Za-z0-9_-]{8,}");

/// Masks bot tokens and API tokens in a log line.
#[must_use]
pub fn redact(input: &str) -> String {
    let output = RE_TG_TOKEN_URL.replace_all(input, "$1[TELEGRAM_TOKEN]");
    let output = RE_TG_TOKEN.replace_all(&output, "[TELEGRAM_TOKEN]");
    RE_API_TOKEN.replace_all(&output, "$1[MASKED]").into_owned()
}

struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&s).as_bytes())?;
        // The redacted length may differ; report the input as consumed.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
        }
    }
}

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(telegram: Option<TelegramLogLayer>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .with(telegram)
        .init();
}

/// Layer that turns qualifying log records into chat messages.
///
/// Formatting happens inside the logging call; delivery is handed to a
/// [`LogForwarder`] through a bounded queue. Records emitted while the
/// forwarder is delivering are not forwarded, so a failing chat cannot feed
/// its own errors back into itself.
pub struct TelegramLogLayer {
    level: Level,
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl TelegramLogLayer {
    /// Creates the layer and the forwarder that delivers its messages.
    ///
    /// The forwarder must be spawned for anything to be sent.
    #[must_use]
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        destination: Recipient,
        level: Level,
    ) -> (Self, LogForwarder) {
        let (tx, rx) = mpsc::channel(LOG_FORWARD_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                level,
                tx,
                dropped: Arc::clone(&dropped),
            },
            LogForwarder {
                rx,
                sink,
                destination,
                dropped,
            },
        )
    }

    fn accepts(&self, level: Level, target: &str) -> bool {
        // More verbose levels compare greater
        level <= self.level
            && !target.starts_with(LOG_FORWARD_TARGET)
            && !TRANSPORT_TARGETS
                .iter()
                .any(|t| target == *t || target.starts_with(&format!("{t}::")))
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if FORWARDING.try_with(|_| ()).is_ok() {
            return;
        }
        let meta = event.metadata();
        if !self.accepts(*meta.level(), meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let text = format!(
            "{} {}: {}{}",
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        );
        let text = crate::utils::truncate_str(redact(&text), TELEGRAM_MESSAGE_LIMIT);

        match self.tx.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // The forwarder is gone; stderr still has the record.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

tokio::task_local! {
    /// Set for the duration of a forwarder delivery.
    static FORWARDING: ();
}

/// Delivers messages produced by [`TelegramLogLayer`], one at a time.
pub struct LogForwarder {
    rx: mpsc::Receiver<String>,
    sink: Arc<dyn NotificationSink>,
    destination: Recipient,
    dropped: Arc<AtomicU64>,
}

impl LogForwarder {
    /// Runs until the layer is dropped.
    ///
    /// Failures are reported under [`LOG_FORWARD_TARGET`], which the layer
    /// ignores.
    pub async fn run(mut self) {
        while let Some(text) = self.rx.recv().await {
            let delivery = self.sink.deliver(&self.destination, &text);
            if let Err(e) = FORWARDING.scope((), delivery).await {
                warn!(target: LOG_FORWARD_TARGET, "Failed to forward log record: {}", e);
            }

            let dropped = self.dropped.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                warn!(
                    target: LOG_FORWARD_TARGET,
                    dropped, "Log forward queue was full, records dropped"
                );
            }
        }
    }

    /// Records dropped since the last report because the queue was full.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
