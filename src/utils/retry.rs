// Retry logic with Retry-After hint support
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::debug;

/// Longest delay honoured from an upstream hint.
const MAX_HINTED_DELAY: Duration = Duration::from_secs(60);

/// A failed attempt as seen by [`with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptError {
    pub status: u16,
    pub body: String,
    /// Delay suggested by the upstream, if any.
    pub retry_after: Option<Duration>,
}

impl AttemptError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Parse a `Retry-After` header value given in seconds (e.g. "3", "0.5").
/// Returns the duration, capped at 60 seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let hinted = Duration::from_millis((seconds * 1000.0) as u64);
    Some(hinted.min(MAX_HINTED_DELAY))
}

/// Create exponential backoff configuration for retries
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(200),
        initial_interval: Duration::from_millis(200),
        randomization_factor: 0.3,
        multiplier: 2.0,
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    }
}

/// Determine if an HTTP status code is retryable
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Execute `operation` up to `max_attempts` times.
/// - Uses the upstream Retry-After hint if available
/// - Falls back to exponential backoff
/// - Gives up immediately on non-retryable statuses
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, AttemptError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptError>>,
{
    let mut backoff = create_backoff();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(err.status) || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = match err.retry_after {
                    Some(hinted) => {
                        debug!(
                            "{} failed with {} (attempt {}), upstream suggests waiting {}ms",
                            operation_name,
                            err.status,
                            attempt,
                            hinted.as_millis()
                        );
                        hinted
                    }
                    None => {
                        let backoff_delay =
                            backoff.next_backoff().unwrap_or(Duration::from_secs(10));
                        debug!(
                            "{} failed with {} (attempt {}), retrying after {}ms",
                            operation_name,
                            err.status,
                            attempt,
                            backoff_delay.as_millis()
                        );
                        backoff_delay
                    }
                };

                tokio::time::sleep(delay).await;
            }
        }
    }
}
