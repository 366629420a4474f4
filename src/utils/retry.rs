// Retry logic with exponential backoff
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Create exponential backoff configuration for re-registration attempts
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_secs(1),        // Start at 1s
        initial_interval: Duration::from_secs(1),
        randomization_factor: 0.3,                       // Add jitter
        multiplier: 2.0,                                 // Double each time
        max_interval: Duration::from_secs(300),          // Cap at 5 minutes
        max_elapsed_time: Some(Duration::from_secs(3600)), // Give up after an hour
        ..Default::default()
    }
}

/// Execute `operation` until it succeeds, the error is not retryable, or the
/// backoff schedule is exhausted. The last error is returned on give-up.
pub async fn with_backoff<F, Fut, T, E>(
    operation_name: &str,
    mut backoff: ExponentialBackoff,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                let Some(delay) = backoff.next_backoff() else {
                    warn!("{} giving up after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                };

                debug!(
                    "{} failed (attempt {}): {}, retrying after {}ms",
                    operation_name,
                    attempt,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: Duration::from_millis(1),
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff(
            "test",
            fast_backoff(),
            |_| true,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {}", n))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff(
            "test",
            fast_backoff(),
            |_| false,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows() {
        let mut backoff = create_backoff();
        backoff.randomization_factor = 0.0;
        let first = backoff.next_backoff().unwrap();
        let second = backoff.next_backoff().unwrap();
        assert!(second > first);
    }
}
