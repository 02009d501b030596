//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Provides standard
//! backoff configurations for store contention and fulfillment calls.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for units that failed on a busy or locked store.
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: 5
/// - Jitter enabled
pub fn persistence_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter()
}

/// Backoff for fulfillment webhook calls.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 5
/// - Jitter enabled
pub fn fulfillment_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(5)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::Retryable;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_persistence_backoff_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = (|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("busy")
            } else {
                Ok(n)
            }
        })
        .retry(persistence_backoff().with_min_delay(Duration::from_millis(1)))
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_gives_up_after_max_times() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .retry(
            fulfillment_backoff()
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2)),
        )
        .await;

        assert!(result.is_err());
        // initial attempt plus five retries
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }
}
