// src/retry.rs
// Shared retry/backoff primitives for C2/C3/C9, grounded on
// utils::timeout::with_timeout (kept as-is, re-exported) and
// utils::rate_limiter::RateLimiter's jittered-wait idiom, generalized into an
// exponential-backoff retry loop for 429-aware provider calls.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub use crate::utils::timeout::with_timeout;

/// A classification of whether a failed attempt should be retried, and how to
/// wait before the next attempt. Returned by the caller's error-classifier
/// closure so retry.rs stays provider-agnostic.
#[derive(Debug, Clone, Copy)]
pub enum RetryDecision {
    /// Retry after the given number of seconds (e.g. server's Retry-After).
    RetryAfter(u64),
    /// Retry using the caller's exponential backoff schedule.
    Retry,
    /// Do not retry; propagate the error immediately.
    Fail,
}

/// Runs `operation` up to `max_attempts` times, calling `classify` on each
/// error to decide whether/how to wait before the next attempt. `base_secs`
/// and `factor` drive the exponential schedule when `classify` returns
/// `RetryDecision::Retry`.
pub async fn retry_operation<F, Fut, T, C>(
    mut operation: F,
    mut classify: C,
    max_attempts: u32,
    base_secs: u64,
    factor: u64,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: FnMut(&anyhow::Error) -> RetryDecision,
{
    let mut attempt = 0;
    let mut delay = base_secs;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                // Classify before giving up on the terminal attempt too: the
                // closure's side effects (e.g. marking a key's cooldown on a
                // daily-quota error) must run even when there is no retry left.
                let decision = classify(&err);

                if matches!(decision, RetryDecision::Fail) || attempt >= max_attempts {
                    return Err(err);
                }

                let wait = match decision {
                    RetryDecision::Fail => unreachable!(),
                    RetryDecision::RetryAfter(secs) => secs,
                    RetryDecision::Retry => {
                        let computed = delay;
                        delay = delay.saturating_mul(factor.max(1));
                        computed
                    }
                };

                warn!(
                    attempt,
                    max_attempts, wait_secs = wait, "retrying after error: {}", err
                );
                sleep_with_jitter(wait).await;
            }
        }
    }
}

/// Sleeps `base_secs` plus up to 250ms of jitter, to avoid thundering-herd
/// retries across concurrently rotating keys.
pub async fn sleep_with_jitter(base_secs: u64) {
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..250);
    tokio::time::sleep(Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_operation(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| RetryDecision::Retry,
            5,
            0,
            2,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fail_decision_short_circuits() {
        let result: Result<()> = retry_operation(
            || async { Err(anyhow::anyhow!("auth error")) },
            |_| RetryDecision::Fail,
            5,
            0,
            2,
        )
        .await;

        assert!(result.is_err());
    }
}
