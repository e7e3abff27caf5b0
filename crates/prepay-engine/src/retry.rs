//! Typed retry policy for transient failures.
//!
//! Retry behavior is attached to error kinds rather than scattered across
//! call sites: only errors classified transient by
//! [`LedgerError::is_transient`] are retried, with exponential backoff up
//! to a cap. Terminal errors propagate immediately.

use std::future::Future;
use std::time::Duration;

use prepay_core::LedgerError;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles with each attempt.
    pub initial_backoff: Duration,

    /// Upper bound on the backoff.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or exhausts the
/// configured attempts.
///
/// # Errors
///
/// Returns the last error: immediately for terminal errors, after
/// `max_attempts` for transient ones.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 0;
    let mut backoff_ms = u64::try_from(config.initial_backoff.as_millis()).unwrap_or(u64::MAX);
    let max_backoff_ms = u64::try_from(config.max_backoff.as_millis()).unwrap_or(u64::MAX);

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    tracing::warn!(
                        operation = %operation,
                        attempt = %attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                tracing::debug!(
                    operation = %operation,
                    attempt = %attempt,
                    backoff_ms = %backoff_ms,
                    error = %e,
                    "transient failure, retrying"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
            }
            Err(e) => return Err(e),
        }
    }
}
