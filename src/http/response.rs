//! Call results: responses, terminal failures and the outcome that wraps them.

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Longest body excerpt kept in an HTTP failure, in characters.
pub const BODY_EXCERPT_LIMIT: usize = 1024;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Statuses 400 and above are errors; everything below counts as success.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// `Retry-After` given as delta-seconds. HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Single-line, truncated copy of the body for log lines.
    pub fn body_excerpt(&self) -> String {
        single_line_excerpt(&self.text(), BODY_EXCERPT_LIMIT)
    }
}

fn single_line_excerpt(text: &str, limit: usize) -> String {
    let line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(limit)
        .collect();
    line.trim_end().to_string()
}

/// Category of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Http,
    Connection,
    Unknown,
}

/// Terminal classification of a call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    /// The server answered with a status of 400 or above.
    #[error("HTTP {status}: {body_excerpt}")]
    Http { status: u16, body_excerpt: String },

    /// No response was received: DNS, refused, reset or timed out.
    #[error("Connection error: {detail}")]
    Connection { detail: String },

    /// Anything else that broke the attempt.
    #[error("Undefined error: {detail}")]
    Unknown { detail: String },
}

impl Failure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Failure::Http { .. } => ErrorKind::Http,
            Failure::Connection { .. } => ErrorKind::Connection,
            Failure::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Failure::Http { body_excerpt, .. } => body_excerpt,
            Failure::Connection { detail } | Failure::Unknown { detail } => detail,
        }
    }
}

/// Result of one `execute` call, retries included.
#[must_use]
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Response),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure.kind()),
        }
    }

    pub fn into_result(self) -> Result<Response, Failure> {
        match self {
            Outcome::Success(response) => Ok(response),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}
