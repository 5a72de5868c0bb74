//! Long-polling client for the review API.
//!
//! Every transport failure is folded into a [`PollOutcome`] variant so the
//! polling loop can match on outcome kinds instead of inspecting errors.

use super::{Cursor, PollResponse};
use reqwest::{Client as HttpClient, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Result of one long-poll request.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Success status with a well-formed body.
    Response(PollResponse),
    /// The server held the request longer than the read timeout.
    ReadTimeout,
    /// The server could not be reached (DNS, refused, reset).
    Connectivity(String),
    /// The server answered with a non-success status.
    Rejected {
        /// HTTP status code
        status: u16,
        /// Short description of the response body
        body: String,
    },
    /// Success status, but the body is not a valid poll response.
    Malformed(String),
    /// Any other failure while issuing or reading the request.
    Failed(String),
}

/// Source of review status updates.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReviewSource: Send + Sync {
    /// Issues one long poll, resuming after `cursor`.
    async fn poll(&self, cursor: Cursor) -> PollOutcome;
}

/// HTTP client for the dvmn.org long-polling endpoint.
#[derive(Debug, Clone)]
pub struct DvmnClient {
    http: HttpClient,
    url: String,
    auth_header: String,
}

impl DvmnClient {
    /// Creates a client for `url` authenticated with `token`.
    ///
    /// `poll_timeout` bounds how long one request may wait for data and
    /// should exceed the server's own long-poll window; `connect_timeout`
    /// bounds connection setup only.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(
        url: impl Into<String>,
        token: &str,
        poll_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(poll_timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            auth_header: format!("Token {token}"),
        })
    }

    async fn send(&self, cursor: Cursor) -> Result<(StatusCode, String), reqwest::Error> {
        let mut request = self
            .http
            .get(&self.url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header);

        if let Some(timestamp) = cursor.as_query() {
            request = request.query(&[("timestamp", timestamp)]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl ReviewSource for DvmnClient {
    async fn poll(&self, cursor: Cursor) -> PollOutcome {
        debug!(%cursor, "Sending long poll");

        match self.send(cursor).await {
            Ok((status, body)) if status.is_success() => match PollResponse::from_json(&body) {
                Ok(response) => PollOutcome::Response(response),
                Err(e) => PollOutcome::Malformed(e.to_string()),
            },
            Ok((status, body)) => PollOutcome::Rejected {
                status: status.as_u16(),
                body: summarize_body(&body),
            },
            Err(e) => classify_error(&e),
        }
    }
}

/// Maps a transport error to its outcome kind.
///
/// Connect timeouts count as connectivity failures, not as idle timeouts.
fn classify_error(error: &reqwest::Error) -> PollOutcome {
    if error.is_connect() {
        PollOutcome::Connectivity(error.to_string())
    } else if error.is_timeout() {
        PollOutcome::ReadTimeout
    } else if error.is_request() {
        // Failures while sending (reset, broken pipe) are not decode or body errors
        PollOutcome::Connectivity(error.to_string())
    } else {
        PollOutcome::Failed(error.to_string())
    }
}

/// Keeps log lines short: HTML error pages are replaced, long bodies truncated.
fn summarize_body(body: &str) -> String {
    const MAX_BODY_CHARS: usize = 500;

    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        "(HTML error page)".to_string()
    } else if body.chars().count() > MAX_BODY_CHARS {
        format!(
            "{}... (truncated)",
            crate::utils::truncate_str(body, MAX_BODY_CHARS)
        )
    } else {
        body.to_string()
    }
}
