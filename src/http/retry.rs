//! Retry policy: which failures are retried and how long to wait between attempts.

use std::collections::BTreeSet;
use std::time::Duration;

use super::request::Method;

/// Total attempts per call, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Wait after the first failed attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(3);

/// Growth factor applied to the wait for every further attempt.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for a single wait.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Statuses that are worth another attempt.
pub const RETRY_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

/// Verbs that may be sent more than once.
pub const RETRY_METHODS: [Method; 3] = [Method::Get, Method::Post, Method::Delete];

/// Statuses for which a `Retry-After` header replaces the computed backoff.
pub const RETRY_AFTER_STATUS_CODES: [u16; 3] = [413, 429, 503];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,

    #[error("backoff multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),
}

/// What went wrong with a single attempt, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// The server answered with this status.
    Status(u16),
    /// No response: the connection could not be made or broke down.
    Connection,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Classify what we have.
    Stop,
    /// Try again after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff retry policy.
///
/// A policy is validated when it is built and never changes afterwards, so one
/// value can back any number of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_multiplier: f64,
    backoff_max: Duration,
    retryable_status_codes: BTreeSet<u16>,
    retryable_methods: BTreeSet<Method>,
    respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff_max: DEFAULT_BACKOFF_MAX,
            retryable_status_codes: RETRY_STATUS_CODES.into_iter().collect(),
            retryable_methods: RETRY_METHODS.into_iter().collect(),
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Builds a policy with the default status and method sets.
    pub fn new(
        max_attempts: u32,
        backoff_base: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }
        Ok(Self {
            max_attempts,
            backoff_base,
            backoff_multiplier,
            ..Self::default()
        })
    }

    pub fn with_backoff_max(mut self, backoff_max: Duration) -> Self {
        self.backoff_max = backoff_max;
        self
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    pub fn with_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    pub fn is_retryable_method(&self, method: Method) -> bool {
        self.retryable_methods.contains(&method)
    }

    /// Wait after failed attempt `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Decide whether failed attempt `attempt` (1-based) gets a successor.
    ///
    /// `retry_after` is the server's requested delay, if the response had one.
    pub fn decide(
        &self,
        method: Method,
        attempt: u32,
        trigger: RetryTrigger,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if attempt >= self.max_attempts || !self.is_retryable_method(method) {
            return RetryDecision::Stop;
        }

        match trigger {
            RetryTrigger::Connection => RetryDecision::RetryAfter(self.backoff(attempt)),
            RetryTrigger::Status(status) if self.is_retryable_status(status) => {
                let delay = match retry_after {
                    Some(requested)
                        if self.respect_retry_after
                            && RETRY_AFTER_STATUS_CODES.contains(&status) =>
                    {
                        requested.min(self.backoff_max)
                    }
                    _ => self.backoff(attempt),
                };
                RetryDecision::RetryAfter(delay)
            }
            RetryTrigger::Status(_) => RetryDecision::Stop,
        }
    }
}
