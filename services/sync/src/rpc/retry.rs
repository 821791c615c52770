//! Retry classification and backoff for remote calls.
//!
//! Every call attempt is reduced to a [`CallOutcome`]. Whether to try again,
//! and after how long, is decided by [`RetryPolicy::next_delay`] from that tag
//! and the number of retries already spent. Nothing here inspects error types.

use std::time::Duration;

use rand::Rng;

/// Upper bound for a server-provided `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum CallOutcome<T, E> {
    Ok(T),
    /// Transient failure. `retry_after` carries a server-requested wait.
    Retryable {
        error: E,
        retry_after: Option<Duration>,
    },
    Fatal(E),
}

impl<T, E> CallOutcome<T, E> {
    pub fn retryable(error: E) -> Self {
        Self::Retryable {
            error,
            retry_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the next attempt, or `None` to stop.
    ///
    /// `retries_done` is the number of retries already performed; `jitter` is
    /// a fraction in `[0, 1)`. Only `Retryable` outcomes are retried.
    pub fn next_delay<T, E>(
        &self,
        outcome: &CallOutcome<T, E>,
        retries_done: u32,
        jitter: f64,
    ) -> Option<Duration> {
        let CallOutcome::Retryable { retry_after, .. } = outcome else {
            return None;
        };
        if retries_done >= self.max_retries {
            return None;
        }
        let backoff = backoff_delay(self.base_delay, retries_done + 1, jitter);
        Some(match retry_after {
            Some(wait) => (*wait).min(MAX_RETRY_AFTER).max(backoff),
            None => backoff,
        })
    }

    /// [`Self::next_delay`] with jitter drawn from the thread RNG.
    pub fn next_delay_jittered<T, E>(
        &self,
        outcome: &CallOutcome<T, E>,
        retries_done: u32,
    ) -> Option<Duration> {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.next_delay(outcome, retries_done, jitter)
    }
}

/// `base * 2^(retry - 1) + base * jitter` for the 1-indexed `retry`.
pub fn backoff_delay(base: Duration, retry: u32, jitter: f64) -> Duration {
    let exponent = retry.saturating_sub(1).min(30);
    let jitter = jitter.clamp(0.0, 1.0 - f64::EPSILON);
    base.saturating_mul(1u32 << exponent)
        .saturating_add(base.mul_f64(jitter))
}
