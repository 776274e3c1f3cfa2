//! Bounded exponential backoff for remote calls.

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter, 0.0 disables.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.0,
        }
    }
}

/// Outcome of a single attempt as judged by the caller.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Attempt succeeded.
    Done(T),
    /// Attempt failed in a way worth retrying.
    Retry(E),
    /// Attempt failed permanently.
    Fail(E),
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter_ratio;
        let jitter = rand::rng().random_range(0.0..=spread);
        Duration::from_secs_f64(delay.as_secs_f64() + jitter).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the last error when all attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        warn!("{label} failed after {attempts} attempts: {err}");
                        return Err(err);
                    }
                    let delay = self.jittered(self.delay_for_attempt(attempt - 1));
                    warn!(
                        "{label} failed (attempt {attempt}/{attempts}): {err}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
