//! HTTP client with built-in retry logic and failure classification.

use anyhow::Result;
use log::debug;

use super::observer::{LogObserver, RequestObserver};
use super::request::{Method, RequestOptions, RequestSpec};
use super::response::{Failure, Outcome, Response};
use super::retry::{RetryDecision, RetryPolicy, RetryTrigger};
use super::transport::{Session, SessionConfig, Sleeper, ThreadSleeper, Transport, TransportError};

/// HTTP client that retries transient failures and classifies what is left.
///
/// Every call gets its own attempt counter, so a client can be reused for any
/// number of sequential calls.
pub struct ResilientClient<T = Session, S = ThreadSleeper, O = LogObserver> {
    transport: T,
    policy: RetryPolicy,
    sleeper: S,
    observer: O,
}

impl ResilientClient {
    /// Client over a default [`Session`] with the given policy.
    pub fn from_policy(policy: RetryPolicy) -> Result<Self> {
        let session = Session::new(SessionConfig::default())?;
        Ok(Self::new(session, policy))
    }
}

impl<T: Transport> ResilientClient<T> {
    /// Client that sleeps on the current thread and reports through `log`.
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self::with_parts(transport, policy, ThreadSleeper, LogObserver)
    }
}

impl<T: Transport, S: Sleeper, O: RequestObserver> ResilientClient<T, S, O> {
    pub fn with_parts(transport: T, policy: RetryPolicy, sleeper: S, observer: O) -> Self {
        Self {
            transport,
            policy,
            sleeper,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs `method url` with the given options.
    pub fn execute(&self, method: Method, url: &str, options: RequestOptions) -> Outcome {
        let request = RequestSpec::new(method, url).with_options(options);
        self.send(&request)
    }

    /// Performs a prepared request, retrying per the policy.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub fn send(&self, request: &RequestSpec) -> Outcome {
        if let Err(e) = request.validate() {
            return self.fail(
                request,
                Failure::Unknown {
                    detail: e.to_string(),
                },
                0,
            );
        }

        let mut attempt = 1u32;
        loop {
            let result = self.transport.send(request);

            let trigger = match &result {
                Ok(response) if self.policy.is_retryable_status(response.status) => {
                    Some(RetryTrigger::Status(response.status))
                }
                Err(TransportError::Connection(_)) => Some(RetryTrigger::Connection),
                _ => None,
            };

            if let Some(trigger) = trigger {
                let retry_after = result.as_ref().ok().and_then(Response::retry_after);
                match self
                    .policy
                    .decide(request.method, attempt, trigger, retry_after)
                {
                    RetryDecision::RetryAfter(delay) => {
                        let reason = match &result {
                            Ok(response) => format!("HTTP {}", response.status),
                            Err(e) => e.to_string(),
                        };
                        self.observer.on_retry(request, attempt, delay, &reason);
                        self.sleeper.sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    RetryDecision::Stop => {}
                }
            }

            return self.classify(request, result, attempt);
        }
    }

    fn classify(
        &self,
        request: &RequestSpec,
        result: Result<Response, TransportError>,
        attempts: u32,
    ) -> Outcome {
        let failure = match result {
            Ok(response) if !response.is_error() => {
                debug!(
                    "{} {} succeeded with {} after {} attempt(s)",
                    request.method, request.url, response.status, attempts
                );
                return Outcome::Success(response);
            }
            Ok(response) => Failure::Http {
                status: response.status,
                body_excerpt: response.body_excerpt(),
            },
            Err(TransportError::Connection(detail)) => Failure::Connection { detail },
            Err(TransportError::Other(detail)) => Failure::Unknown { detail },
        };
        self.fail(request, failure, attempts)
    }

    fn fail(&self, request: &RequestSpec, failure: Failure, attempts: u32) -> Outcome {
        self.observer.on_failure(request, &failure, attempts);
        Outcome::Failure(failure)
    }
}
