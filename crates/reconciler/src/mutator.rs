//! Retry of mutating calls that lose a race with a server-side operation.
//!
//! Unlike polling, this re-issues a *write* whose failure mode is "another
//! mutation on this object is in flight". Only the one configured exception
//! name is retried, with a fixed delay and no backoff. Everything else is
//! returned to the caller untouched.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use converge_core::{Error, NamedException, Result, RetrySettings};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Which conflict to retry, and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySpec {
    transient_exception: String,
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetrySpec {
    /// Retry `transient_exception` forever with a fixed `delay`.
    pub fn new(transient_exception: impl Into<String>, delay: Duration) -> Self {
        Self {
            transient_exception: transient_exception.into(),
            delay,
            max_attempts: None,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            transient_exception: settings.exception.clone(),
            delay: settings.delay(),
            max_attempts: settings.max_attempts,
        }
    }

    /// Give up after `attempts` calls in total. The last conflict error is
    /// returned to the caller.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn transient_exception(&self) -> &str {
        &self.transient_exception
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether `error` is the configured transient conflict.
    pub fn is_transient<E: NamedException>(&self, error: &E) -> bool {
        error.exception_name() == Some(self.transient_exception.as_str())
    }
}

/// Call `op` until it succeeds or fails with anything other than the
/// configured conflict.
///
/// Unbounded unless `spec` carries `max_attempts`; wrap in
/// [`mutate_with_deadline`] or a caller-side timeout for a hard bound.
pub async fn mutate_with_retry<T, E, F, Fut>(spec: &RetrySpec, mut op: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: NamedException + Display,
{
    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Mutation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if spec.is_transient(&error) => {
                if spec.max_attempts.is_some_and(|max| attempt >= max) {
                    warn!(
                        attempt,
                        exception = %spec.transient_exception,
                        "Mutation still conflicting, giving up"
                    );
                    return Err(error);
                }
                warn!(
                    attempt,
                    exception = %spec.transient_exception,
                    delay_ms = spec.delay.as_millis(),
                    error = %error,
                    "Mutation conflicted with in-flight operation, retrying"
                );
                sleep(spec.delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// [`mutate_with_retry`] bounded by a wall-clock deadline.
///
/// Returns [`Error::Timeout`] if the call has not landed within `deadline`.
pub async fn mutate_with_deadline<T, E, F, Fut>(
    resource: &str,
    spec: &RetrySpec,
    deadline: Duration,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: NamedException + Display + Into<Error>,
{
    match timeout(deadline, mutate_with_retry(spec, op)).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(Error::timeout(resource, deadline, None)),
    }
}
