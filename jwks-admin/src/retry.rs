//! Backoff and timeout helpers for the compare-and-swap loop
//!
//! Retries use exponential backoff with jitter:
//! - the delay before retry `n` (zero-based) is `base_backoff * 2^n`
//! - the exponential part is capped at `max_backoff`
//! - up to 50% of the capped delay is added as random jitter

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Computes the delay before the given retry (0 is the first retry)
pub(crate) fn compute_backoff(config: &RepositoryConfig, retry: u32) -> Duration {
    let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
    let capped = config
        .base_backoff
        .saturating_mul(factor)
        .min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}

/// Runs `operation` with a deadline, mapping expiry to [`Error::StoreTimeout`]
pub(crate) async fn with_timeout<T, Fut>(
    timeout: Duration,
    operation: &'static str,
    future: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "store call timed out"
            );
            Err(Error::StoreTimeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(base_ms: u64, max_ms: u64) -> RepositoryConfig {
        RepositoryConfig::new()
            .with_base_backoff(Duration::from_millis(base_ms))
            .with_max_backoff(Duration::from_millis(max_ms))
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = config(100, 10_000);

        let d0 = compute_backoff(&config, 0);
        assert!(d0 >= Duration::from_millis(100));
        assert!(d0 <= Duration::from_millis(150));

        let d2 = compute_backoff(&config, 2);
        assert!(d2 >= Duration::from_millis(400));
        assert!(d2 <= Duration::from_millis(600));
    }

    #[test]
    fn test_compute_backoff_capped() {
        let config = config(100, 300);
        let delay = compute_backoff(&config, 10);
        assert!(delay >= Duration::from_millis(300));
        assert!(delay <= Duration::from_millis(450));

        // Huge shifts saturate instead of overflowing
        assert!(compute_backoff(&config, 64) <= Duration::from_millis(450));
    }

    #[test]
    fn test_zero_backoff() {
        assert_eq!(compute_backoff(&config(0, 0), 3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_millis(50), "load", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert_matches!(
            result,
            Err(Error::StoreTimeout { operation: "load", timeout_ms: 50 })
        );
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let ok = with_timeout(Duration::from_secs(1), "save", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<()> = with_timeout(Duration::from_secs(1), "save", async {
            Err(Error::KeyNotFound("k".into()))
        })
        .await;
        assert_matches!(err, Err(Error::KeyNotFound(_)));
    }
}
