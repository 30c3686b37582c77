//! Retry policy and predicates for handling transient failures.
//!
//! A [`Retryer`] combines a [`RetryPolicy`] (how many attempts, how long to
//! wait) with a [`RetryPredicate`] (which errors are worth another attempt).

use crate::Error;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Backoff configuration.
///
/// The delay before retry `n` (1-indexed) is
/// `min(max_delay, base_delay * multiplier^(n-1))`, plus random jitter in
/// `[0, delay)` when `jitter` is enabled.
///
/// # Examples
///
/// ```
/// use cloudcall::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(5),
///     multiplier: 2.0,
///     jitter: false,
///     respect_retry_after: true,
/// };
/// assert_eq!(policy.backoff(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Whether to add random jitter (recommended).
    pub jitter: bool,
    /// Prefer the server's `Retry-After` / reset hint, capped at `max_delay`.
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The un-jittered delay before retry `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// The delay before retry `attempt`, with jitter applied if enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..1.0);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// # Examples
///
/// ```
/// use cloudcall::{Error, RetryPredicate};
///
/// struct OnlyTimeouts;
///
/// impl RetryPredicate for OnlyTimeouts {
///     fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
///         matches!(error, Error::Transport { timeout: true, .. })
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if `error`, seen on attempt `attempt`, is worth another try.
    fn should_retry(&self, error: &Error, attempt: u32) -> bool;
}

/// Retries every error that [`Error::is_retryable`] accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
        error.is_retryable()
    }
}

/// Retries only transport-level failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnTransport;

impl RetryPredicate for RetryOnTransport {
    fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
        matches!(error, Error::Transport { .. })
    }
}

/// Combines the retry policy with a predicate.
#[derive(Clone)]
pub struct Retryer {
    policy: RetryPolicy,
    predicate: Arc<dyn RetryPredicate>,
}

impl std::fmt::Debug for Retryer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retryer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for Retryer {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Retryer {
    /// Creates a retryer using [`RetryOnRetryable`].
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_predicate(policy, Arc::new(RetryOnRetryable))
    }

    /// Creates a retryer with a custom predicate.
    pub fn with_predicate(policy: RetryPolicy, predicate: Arc<dyn RetryPredicate>) -> Self {
        Self { policy, predicate }
    }

    /// The configured policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decides whether to retry after `error` ended attempt `attempt`.
    ///
    /// Returns the delay to wait before the next attempt, or `None` to stop.
    /// A 401 that is still eligible is retried immediately, since the next
    /// attempt carries a refreshed token.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> Option<Duration> {
        if attempt >= self.policy.max_attempts {
            return None;
        }
        // Final whatever the predicate says.
        if matches!(
            error,
            Error::Cancelled
                | Error::DeadlineExceeded
                | Error::Authentication {
                    after_refresh: true,
                    ..
                }
        ) {
            return None;
        }
        if !self.predicate.should_retry(error, attempt) {
            return None;
        }
        if matches!(error, Error::Authentication { .. }) {
            return Some(Duration::ZERO);
        }
        if self.policy.respect_retry_after {
            if let Some(delay) = error.rate_limit_delay(self.policy.max_delay) {
                return Some(delay);
            }
        }
        Some(self.policy.delay_for_attempt(attempt))
    }
}
