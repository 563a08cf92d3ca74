//! Retry-with-backoff wrapper for transient graph store failures.
//!
//! Every multi-step write sequence against the store goes through
//! [`retry_with_backoff`]. This covers connection drops and transient write
//! errors; it is not a substitute for serializing clustering runs.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::PodgraphError;

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts with
/// exponential backoff (`base_delay_ms * backoff_factor^(attempt-1)`), plus a
/// small random jitter when enabled. The final error is propagated unchanged.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, PodgraphError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PodgraphError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts {
                    let delay = backoff_delay(policy, attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!("{} failed after {} attempts: {}", what, attempts, e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        PodgraphError::Database(format!("{} failed with no recorded error", what))
    }))
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay_ms as f64;
    let mut millis = base * policy.backoff_factor.powi(attempt as i32 - 1);
    if policy.jitter {
        // Up to +25%, seeded from the wall clock. Enough to spread out
        // competing retries without pulling in an RNG dependency.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let frac = (nanos % 1000) as f64 / 1000.0;
        millis += millis * 0.25 * frac;
    }
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 10,
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(&quick_policy(3), "op", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PodgraphError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(&quick_policy(3), "op", move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(PodgraphError::Database("transient".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&quick_policy(3), "op", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PodgraphError::Database("store unreachable".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("store unreachable"));
    }

    #[test]
    fn test_backoff_delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2000,
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(8000));
    }
}
