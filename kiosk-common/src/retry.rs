//! Bounded retry helper
//!
//! Collaborators with flaky startup (socket bind, gamepad subsystem) wrap
//! their initialization in [`retry`] or [`retry_blocking`]. The session
//! state machine itself never retries.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Delay strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// Delay doubles after each failure, capped at `max`, with up to 10% jitter
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                let base = initial.saturating_mul(1u32 << shift).min(max);
                let jitter_ms = (base.as_millis() as u64) / 10;
                if jitter_ms == 0 {
                    base
                } else {
                    let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
                    (base + Duration::from_millis(jitter)).min(max)
                }
            }
        }
    }
}

/// Retry limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Backoff,
    /// Upper bound on a single attempt (async only)
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            per_attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with a fixed delay
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            per_attempt_timeout: None,
        }
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Error returned once every attempt has failed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Last attempt returned an error
    #[error("{label} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        label: String,
        attempts: u32,
        last_error: E,
    },

    /// Last attempt exceeded the per-attempt timeout
    #[error("{label} timed out after {attempts} attempt(s)")]
    TimedOut { label: String, attempts: u32 },
}

/// Run an async operation with bounded retries
///
/// `label` appears in log lines and in the returned error.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match policy.per_attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
            None => Some(op(attempt).await),
        };

        let failure = match outcome {
            Some(Ok(value)) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", label, attempt, attempts);
                }
                return Ok(value);
            }
            Some(Err(e)) => {
                warn!("{} attempt {}/{} failed: {}", label, attempt, attempts, e);
                RetryError::Exhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    last_error: e,
                }
            }
            None => {
                warn!("{} attempt {}/{} timed out", label, attempt, attempts);
                RetryError::TimedOut {
                    label: label.to_string(),
                    attempts: attempt,
                }
            }
        };

        if attempt >= attempts {
            return Err(failure);
        }

        tokio::time::sleep(policy.backoff.delay_for(attempt)).await;
    }
}

/// Run a blocking operation with bounded retries
///
/// The per-attempt timeout is not enforced here; blocking calls cannot be
/// abandoned safely.
pub fn retry_blocking<T, E, F>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("{} attempt {}/{} failed: {}", label, attempt, attempts, e);
                if attempt >= attempts {
                    return Err(RetryError::Exhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
        std::thread::sleep(policy.backoff.delay_for(attempt));
    }
}
