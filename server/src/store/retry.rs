//! Local Retry Helper
//!
//! For callers that prefer bounded local retries over breaker-mediated
//! fallback (startup paths, administrative writes). Only transient
//! network-class errors are retried; everything else fails fast.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::StoreError;

/// Longest delay between attempts.
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Run `op` up to `max_attempts` times with exponential backoff
/// (`base * 2^(attempt-1)`, capped at 5 s) between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let exp = base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
                let delay = exp.min(MAX_DELAY);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying store operation");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
