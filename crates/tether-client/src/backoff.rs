//! Reconnection supervisor and its backoff schedule.
//!
//! The schedule is the one the deployed protocol exhibits: the delay starts
//! at the initial value and grows additively by `2 x jitter` after each
//! failed attempt, where the jitter fraction is sampled once per session.
//! Growth is linear and clamped to the maximum, not exponential.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Reconnection budget and delay bounds.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Clamp for the computed delay.
    pub max_delay: Duration,
    /// Jitter bound in `[0, 1]`.
    pub randomization_factor: f64,
    /// Failures tolerated before permanent failure.
    pub max_attempts: usize,
}

/// Mutable backoff state for one connection lifetime.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: usize,
    current_delay_ms: f64,
    jitter: f64,
}

impl Backoff {
    /// Create a schedule, sampling the session's jitter fraction.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        let jitter = rand::thread_rng().gen::<f64>() * policy.randomization_factor;
        Self::with_jitter(policy, jitter)
    }

    /// Create a schedule with a fixed jitter fraction (deterministic tests).
    #[must_use]
    pub fn with_jitter(policy: BackoffPolicy, jitter: f64) -> Self {
        let current_delay_ms =
            (policy.initial_delay.as_millis() as f64).min(policy.max_delay.as_millis() as f64);
        Self {
            policy,
            attempts: 0,
            current_delay_ms,
            jitter,
        }
    }

    /// Failed attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Record one failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }

        let delay = Duration::from_millis(self.current_delay_ms as u64);
        let max_ms = self.policy.max_delay.as_millis() as f64;
        self.current_delay_ms = (self.current_delay_ms + 2.0 * self.jitter).min(max_ms);
        Some(delay)
    }
}

/// Drive `attempt` until it succeeds, the budget is exhausted, or `cancel`
/// fires.
///
/// Each failure is reported through `on_failure` with its 1-based attempt
/// number before the inter-attempt delay elapses. Cancellation aborts the
/// wait immediately with [`ClientError::Cancelled`], distinct from the
/// permanent [`ClientError::ConnectionFailed`].
pub(crate) async fn supervise<T, F, Fut>(
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
    mut on_failure: impl FnMut(usize, &ClientError),
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut backoff = Backoff::new(policy);

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let attempt_number = backoff.attempts() + 1;
        warn!(attempt = attempt_number, error = %error, "Connection attempt failed");
        on_failure(attempt_number, &error);

        match backoff.next_delay() {
            Some(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
                tokio::select! {
                    () = cancel.cancelled() => return Err(ClientError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                return Err(ClientError::ConnectionFailed {
                    attempts: backoff.attempts(),
                    source: Box::new(error),
                })
            }
        }
    }
}
