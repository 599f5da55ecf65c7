//! Transient-failure retry
//!
//! A work unit whose operation fails with a transient error is retried once
//! after a linear backoff (`attempt * backoff_ms`). A transient failure on
//! the final attempt is escalated to a data error; other errors return
//! immediately.

use crate::error::{Result, ToolchainError};
use std::time::Duration;

/// Attempts per work unit (first try plus one retry)
pub const MAX_ATTEMPTS: u32 = 2;

/// Run `operation`, retrying transient failures
///
/// # Arguments
/// * `key` - Artifact key, for logging
/// * `backoff_ms` - Linear backoff base
/// * `operation` - Async closure performing the unit
pub async fn retry_transient<F, Fut, T>(key: &str, backoff_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(key, attempt, "Work unit succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match retry_delay(&err, attempt, backoff_ms) {
                Some(delay) => {
                    tracing::warn!(
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err.escalate()),
            },
        }
    }
}

/// Backoff before the next attempt, or `None` when `err` is final
pub fn retry_delay(err: &ToolchainError, attempt: u32, backoff_ms: u64) -> Option<Duration> {
    if err.is_transient() && attempt < MAX_ATTEMPTS {
        Some(Duration::from_millis(backoff_ms * u64::from(attempt)))
    } else {
        None
    }
}
