//! Bounded exponential-backoff retry for external service calls.
//!
//! The [`RetryPolicy`] is an explicit value injected into the embedding
//! gateway and the generation client, so retry behavior can be tested by
//! driving [`with_retry`] with an injected flaky operation instead of a
//! real service.
//!
//! Backoff doubles per attempt (capped at 2^5 × base, the same ceiling the
//! delay schedule 1s, 2s, 4s, 8s, 16s, 32s implies) with a small random
//! jitter on top.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// One failed attempt against an external service.
#[derive(Debug)]
pub struct TryFailure {
    /// Rate limits, timeouts, 5xx, and network errors are retryable;
    /// other client errors are not.
    pub retryable: bool,
    pub message: String,
}

impl TryFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy matching a config's `max_retries` knob: one initial attempt
    /// plus `max_retries` retries.
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            base_delay: Duration::from_secs(1),
            jitter: 0.1,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = (retry.saturating_sub(1)).min(5);
        let base = self.base_delay.as_secs_f64() * f64::from(1u32 << exp);
        let jittered = base * (1.0 + self.jitter * rand::random::<f64>());
        Duration::from_secs_f64(jittered)
    }
}

/// Run `op` until it succeeds, fails non-retryably, or the attempt budget
/// is exhausted.
///
/// A non-retryable failure surfaces immediately as [`Error::Service`];
/// exhausting the budget surfaces the last failure as [`Error::Transient`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    service: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, TryFailure>>,
{
    let mut last_message = String::new();

    for attempt in 1..=policy.max_attempts.max(1) {
        if attempt > 1 {
            let delay = policy.delay_for(attempt - 1);
            tracing::debug!(service, attempt, ?delay, "retrying after transient failure");
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.retryable => {
                last_message = failure.message;
            }
            Err(failure) => {
                return Err(Error::Service {
                    service,
                    message: failure.message,
                });
            }
        }
    }

    Err(Error::Transient {
        service,
        attempts: policy.max_attempts.max(1),
        message: last_message,
    })
}
