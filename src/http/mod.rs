//! HTTP client module with retry logic and error handling.

mod client;
mod observer;
mod request;
mod response;
mod retry;
mod transport;

pub use client::ResilientClient;
pub use observer::{LogObserver, RequestObserver};
pub use request::{Body, Method, RequestError, RequestOptions, RequestSpec};
pub use response::{BODY_EXCERPT_LIMIT, ErrorKind, Failure, Outcome, Response};
pub use retry::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_ATTEMPTS,
    PolicyError, RETRY_METHODS, RETRY_STATUS_CODES, RetryDecision, RetryPolicy, RetryTrigger,
};
pub use transport::{
    CONNECT_TIMEOUT, READ_TIMEOUT, Session, SessionConfig, Sleeper, ThreadSleeper, Transport,
    TransportError, USER_AGENT,
};
