use rand::Rng;
use reqwest_retry::{
    policies::ExponentialBackoff, Jitter, RetryDecision, RetryPolicy as BackoffPolicy,
};
use slog::{warn, Logger};
use std::{
    future::Future,
    time::{Duration, SystemTime},
};

use crate::FetchError;

/// Retry rules for one provider: exponential backoff with jitter for
/// transient failures, a longer fixed-base wait for HTTP 429, and a cap on
/// total attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    rate_limit_base: Duration,
    rate_limit_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            backoff: ExponentialBackoff::builder()
                .retry_bounds(Duration::from_millis(500), Duration::from_secs(30))
                .jitter(Jitter::Bounded)
                .build_with_max_retries(max_attempts - 1),
            max_attempts,
            rate_limit_base: Duration::from_secs(20),
            rate_limit_jitter: Duration::from_secs(10),
        }
    }

    /// Same classification and cap, without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            backoff: ExponentialBackoff::builder()
                .retry_bounds(Duration::from_millis(1), Duration::from_millis(1))
                .jitter(Jitter::None)
                .build_with_max_retries(max_attempts - 1),
            max_attempts,
            rate_limit_base: Duration::ZERO,
            rate_limit_jitter: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the next attempt, or `None` when `err` must be surfaced.
    /// `attempts_made` counts attempts already performed, including the one
    /// that produced `err`.
    pub fn next_delay(
        &self,
        err: &FetchError,
        attempts_made: u32,
        started: SystemTime,
    ) -> Option<Duration> {
        if !err.is_retryable() || attempts_made >= self.max_attempts {
            return None;
        }

        if let FetchError::RateLimited { retry_after } = err {
            let jitter_ms = self.rate_limit_jitter.as_millis() as u64;
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
            let wait = self.rate_limit_base + jitter;
            return Some(retry_after.map_or(wait, |after| after.max(wait)));
        }

        match self.backoff.should_retry(started, attempts_made - 1) {
            RetryDecision::Retry { execute_after } => Some(
                execute_after
                    .duration_since(SystemTime::now())
                    .unwrap_or_default(),
            ),
            RetryDecision::DoNotRetry => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or exhausts the
/// policy. Returns the result together with the number of attempts made.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    logger: &Logger,
    label: &str,
    mut operation: F,
) -> (Result<T, FetchError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let started = SystemTime::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) => match policy.next_delay(&err, attempts, started) {
                Some(delay) => {
                    warn!(
                        logger,
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        label,
                        attempts,
                        policy.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return (Err(err), attempts),
            },
        }
    }
}
