//! Retry policy shared by the external-capability adapters.
//!
//! Transient faults are retried inside the adapter layer: exponential
//! backoff with jitter, capped at three attempts. Errors that are not
//! retryable propagate immediately.

use crate::types::{AppError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Maximum attempts per adapter call, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for the first backoff step.
const BASE_DELAY_MS: u64 = 200;

/// Backoff delay for the given zero-based retry number, with jitter.
pub fn backoff_delay(retry: u32) -> Duration {
    let base = BASE_DELAY_MS.saturating_mul(1u64 << retry.min(6));
    let jitter = rand::rng().random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, backing off between attempts.
///
/// Only errors with [`AppError::is_retryable`] are retried; the last error
/// is returned when attempts run out.
pub async fn retry_with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<AppError> = None;
    for attempt in 0..MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| AppError::Internal(format!("{} retries exhausted", op_name))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::RateLimited { retry_after_s: 0 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::InvalidInput("bad".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::AdapterUnavailable {
                    adapter: "embedder",
                    message: "down".to_string(),
                    refund_txn_id: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
