//! Reporting hooks for retries and terminal failures.

use std::time::Duration;

use log::{error, warn};

use super::request::RequestSpec;
use super::response::Failure;

/// Receives the notable events of a call.
#[cfg_attr(test, mockall::automock)]
pub trait RequestObserver {
    /// A failed attempt will be retried after `delay`.
    fn on_retry(&self, request: &RequestSpec, attempt: u32, delay: Duration, reason: &str);

    /// The call ended in `failure` after `attempts` attempts.
    fn on_failure(&self, request: &RequestSpec, failure: &Failure, attempts: u32);
}

impl<O: RequestObserver + ?Sized> RequestObserver for &O {
    fn on_retry(&self, request: &RequestSpec, attempt: u32, delay: Duration, reason: &str) {
        (**self).on_retry(request, attempt, delay, reason)
    }

    fn on_failure(&self, request: &RequestSpec, failure: &Failure, attempts: u32) {
        (**self).on_failure(request, failure, attempts)
    }
}

/// Writes events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RequestObserver for LogObserver {
    fn on_retry(&self, request: &RequestSpec, attempt: u32, delay: Duration, reason: &str) {
        warn!(
            "{} {}: attempt {} failed ({}), retrying in {:.1}s...",
            request.method,
            request.url,
            attempt,
            reason,
            delay.as_secs_f64()
        );
    }

    fn on_failure(&self, request: &RequestSpec, failure: &Failure, attempts: u32) {
        match failure {
            Failure::Http {
                status,
                body_excerpt,
            } => {
                error!(
                    "HTTP {}: {} {} (after {} attempt(s))",
                    status, request.method, request.url, attempts
                );
                error!("{}", body_excerpt);
            }
            Failure::Connection { .. } | Failure::Unknown { .. } => {
                error!("{}", failure);
            }
        }
    }
}
