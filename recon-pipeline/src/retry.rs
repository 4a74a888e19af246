//! Bounded exponential backoff for archiving writes

use crate::config::RetryConfig;
use std::future::Future;

/// Run an operation with bounded exponential backoff
///
/// Retries on every error until `max_attempts` is exhausted, doubling the
/// delay up to the configured cap, then returns the last error.
pub async fn with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay();

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(label, attempts, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempts >= config.max_attempts {
                    tracing::error!(label, attempts, %err, "Retries exhausted");
                    return Err(err);
                }
                tracing::warn!(label, attempts, ?delay, %err, "Operation failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay());
            }
        }
    }
}
