/*!
 * Utility functions and helpers for StationLink.
 */
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry an operation with a fixed delay until it succeeds
///
/// There is no attempt cap and no backoff growth: the function only returns
/// once `operation` yields `Ok`. Every failed attempt is logged once.
///
/// # Arguments
///
/// * `delay` - Pause between two attempts
/// * `label` - Name of the operation, used in log lines
/// * `operation` - A function that creates a new future for each attempt
pub async fn retry_until_ok<F, Fut, T, E>(delay: Duration, label: &str, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", label, attempt);
                }
                return value;
            }
            Err(e) => {
                warn!("{} failed (attempt {}): {}", label, attempt, e);
            }
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_ok_first_try() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let start = tokio::time::Instant::now();

        let value = retry_until_ok(Duration::from_secs(1), "Ping", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(42) }
        })
        .await;

        assert_eq!(value, 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retry_until_ok_waits_fixed_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let start = tokio::time::Instant::now();

        let value = retry_until_ok(Duration::from_secs(1), "Ping", move || {
            let current = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if current < 3 {
                    Err(Error::other("refused"))
                } else {
                    Ok(current)
                }
            }
        })
        .await;

        assert_eq!(value, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        // Three failures, three one-second pauses, no growth
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }
}
