//! Retry policy for upstream calls.
//!
//! Transient failures back off exponentially with jitter. A `Retry-After`
//! hint from the upstream replaces the computed delay, capped so a hostile or
//! confused upstream cannot park a run for hours.

use std::{future::Future, time::Duration};

use {
    parley_config::RetryConfig,
    parley_httpservice::{CallDeadline, UpstreamError},
    rand::Rng,
    tracing::warn,
};

/// Longest `Retry-After` hint honoured.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff ceiling before jitter for the retry after `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before the retry that follows `attempt`, jitter included.
    #[must_use]
    pub fn delay(&self, attempt: u32, err: &UpstreamError) -> Duration {
        if let Some(hint) = err.retry_after() {
            return hint.min(MAX_RETRY_AFTER);
        }
        let base = self.base_delay(attempt);
        let half = base / 2;
        let jitter_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        half + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Result of [`retry`], with the number of attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, UpstreamError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently or the policy is exhausted.
///
/// Backoff sleeps end early on cancellation or shutdown. Once shutdown has
/// begun no new attempt is started. `on_retry` sees every failure that will be retried.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: &CallDeadline,
    mut on_retry: impl FnMut(u32, &UpstreamError, Duration),
    mut op: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            },
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= policy.max_attempts || deadline.is_shutting_down() {
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }

        let delay = policy.delay(attempt, &err);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis(),
            error = %err,
            "transient upstream error, retrying after delay"
        );
        on_retry(attempt, &err, delay);

        tokio::select! {
            () = deadline.cancelled() => {
                return Attempted {
                    result: Err(UpstreamError::Cancelled),
                    attempts: attempt,
                };
            },
            () = deadline.shutdown_started() => {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                };
            },
            () = tokio::time::sleep(delay) => {},
        }
        attempt += 1;
    }
}
