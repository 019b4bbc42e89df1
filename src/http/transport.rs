//! Single-attempt transport and the blocking session that implements it.

use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use reqwest::blocking::Client;

use super::request::{Body, RequestSpec};
use super::response::Response;

/// Identifying header sent with every request.
pub const USER_AGENT: &str = concat!("kvm-autotester v", env!("KVM_AUTOTESTER_VERSION"));

/// Time allowed to establish a connection, per attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the rest of an attempt once connected.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a single attempt produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// DNS, refused, reset, timeout: worth retrying.
    #[error("{0}")]
    Connection(String),
    /// The request could not be built or sent for a reason retrying won't fix.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Sorts a reqwest error into connection-level or other.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let detail = error_chain(error);
        if error.is_builder() || error.is_redirect() || error.is_decode() {
            TransportError::Other(detail)
        } else if error.is_connect()
            || error.is_timeout()
            || error.is_request()
            || error.is_body()
        {
            TransportError::Connection(detail)
        } else {
            TransportError::Other(detail)
        }
    }
}

/// Joins an error with its sources, e.g. "error sending request: connection refused".
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !detail.contains(&text) {
            detail.push_str(": ");
            detail.push_str(&text);
        }
        source = cause.source();
    }
    detail
}

/// Sends one attempt of a request. No retrying happens at this level.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    fn send(&self, request: &RequestSpec) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &RequestSpec) -> Result<Response, TransportError> {
        (**self).send(request)
    }
}

/// Blocking wait between attempts.
#[cfg_attr(test, mockall::automock)]
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Sleeps on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Settings for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

/// Process-scoped blocking HTTP session.
///
/// Holds a pooled client configured with the identifying header and the
/// per-attempt timeouts. Meant to be created once and reused by sequential
/// calls; concurrent callers should each build their own.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn send_once(&self, request: &RequestSpec) -> reqwest::Result<Response> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.as_str());

        for (name, value) in &request.options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.options.query.is_empty() {
            builder = builder.query(&request.options.query);
        }
        builder = match &request.options.body {
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes()?;

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status,
            body.len()
        );

        Ok(Response::new(status, headers, body.to_vec()))
    }
}

impl Transport for Session {
    fn send(&self, request: &RequestSpec) -> Result<Response, TransportError> {
        self.send_once(request)
            .map_err(|e| TransportError::from_reqwest(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{Method, RequestOptions};
    use mockito::{Matcher, Server};

    fn session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.user_agent.starts_with("kvm-autotester v"));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_send_sets_user_agent_and_reads_body() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/status")
            .match_header("user-agent", USER_AGENT)
            .with_status(200)
            .with_header("x-node", "kvm-01")
            .with_body("ready")
            .create();

        let request = RequestSpec::new(Method::Get, format!("{}/status", server.url()));
        let response = session().send(&request).unwrap();

        mock.assert();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "ready");
        assert_eq!(response.headers.get("x-node").unwrap(), "kvm-01");
    }

    #[test]
    fn test_send_passes_options_through() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/hosts")
            .match_header("x-token", "secret")
            .match_query(Matcher::UrlEncoded("dry_run".into(), "true".into()))
            .match_body(Matcher::Json(serde_json::json!({"name": "kvm-01"})))
            .with_status(201)
            .create();

        let request = RequestSpec::new(Method::Post, format!("{}/hosts", server.url()))
            .with_options(
                RequestOptions::new()
                    .header("X-Token", "secret")
                    .query("dry_run", "true")
                    .json(serde_json::json!({"name": "kvm-01"})),
            );
        let response = session().send(&request).unwrap();

        mock.assert();
        assert_eq!(response.status, 201);
    }

    #[test]
    fn test_send_returns_error_statuses_as_responses() {
        let mut server = Server::new();
        let _m = server
            .mock("GET", "/")
            .with_status(503)
            .with_body("maintenance")
            .create();

        let request = RequestSpec::new(Method::Get, server.url());
        let response = session().send(&request).unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.text(), "maintenance");
    }

    #[test]
    fn test_send_connection_refused_is_connection_error() {
        // Port 1 is reserved and nothing listens there.
        let request = RequestSpec::new(Method::Get, "http://127.0.0.1:1/");
        let err = session().send(&request).unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)), "{err:?}");
    }

    #[test]
    fn test_send_unsupported_scheme_is_other_error() {
        let request = RequestSpec::new(Method::Get, "ftp://example.com/file");
        let err = session().send(&request).unwrap_err();
        assert!(matches!(err, TransportError::Other(_)), "{err:?}");
    }

    #[test]
    fn test_send_invalid_header_is_other_error() {
        let request = RequestSpec::new(Method::Get, "http://127.0.0.1:1/")
            .with_options(RequestOptions::new().header("bad header", "x"));
        let err = session().send(&request).unwrap_err();
        assert!(matches!(err, TransportError::Other(_)), "{err:?}");
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = anyhow::Error::new(inner).context("error sending request");
        let outer: &dyn std::error::Error = outer.as_ref();
        assert_eq!(error_chain(outer), "error sending request: refused");
    }

    #[test]
    fn test_thread_sleeper_zero_is_immediate() {
        let start = std::time::Instant::now();
        ThreadSleeper.sleep(Duration::ZERO);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
