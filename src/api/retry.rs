//! Exponential-backoff retry for idempotent exchange reads.
//!
//! Order placement never goes through here: a timed-out order may still have
//! been accepted, so the next tick re-reads the position instead.

use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ExchangeError;

/// Default policy for market data and position reads.
pub fn read_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(4),
        max_elapsed_time: Some(Duration::from_secs(15)),
        ..Default::default()
    }
}

/// Run `op` under the default read policy.
pub async fn with_retry<T, F, Fut>(what: &str, op: F) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    with_policy(read_policy(), what, op).await
}

/// Run `op`, retrying only errors classified as transient.
pub async fn with_policy<T, F, Fut>(
    policy: ExponentialBackoff,
    what: &str,
    mut op: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    backoff::future::retry_notify(
        policy,
        || {
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |err: ExchangeError, delay: Duration| {
            warn!(request = what, error = %err, retry_in_ms = delay.as_millis() as u64, "Retrying exchange read");
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Some(Duration::from_secs(2)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_policy(fast_policy(), "kline", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ExchangeError::Status { status: 503, body: String::new() })
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_policy(fast_policy(), "position", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Api { code: 10003, message: "invalid api key".into() })
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Api { code: 10003, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
