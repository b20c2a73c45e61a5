//! Bounded fixed-interval polling
//!
//! Every wait in kinder (registry readiness, rollout status) goes through
//! [`wait_with_timeout`]: a deadline, a fixed interval, and a check that can
//! succeed, ask to keep waiting, or fail fatally.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{Error, Result};

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = std::result::Result<Option<T>, String>;

/// Poll `check_fn` every `interval` until it yields a value or `timeout` passes.
///
/// The check runs at least once even with a zero timeout.
pub async fn wait_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let start = Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                if start.elapsed() + interval > timeout {
                    return Err(Error::timeout(description, timeout));
                }
                debug!("Waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(Error::command_failed(format!(
                    "error waiting for {}: {}",
                    description, e
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_value_once_condition_met() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = wait_with_timeout(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "counter",
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n >= 3 {
                        Ok(Some(n))
                    } else {
                        Ok(None)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "never",
            || async { Ok(None) },
        )
        .await
        .unwrap_err();

        match err {
            Error::Timeout { what, timeout } => {
                assert_eq!(what, "never");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "broken",
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused".to_string())
                }
            },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
