use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

const BASE: Duration = Duration::from_millis(50);
const CAP: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff with jitter, capped, bounded at five attempts.
/// Only `AppError::is_transient` errors are
/// retried; anything else returns immediately. Exhaustion is surfaced as
/// `FatalDownstream`, which the caller treats as fatal to consumption.
pub async fn with_retry<F, Fut, T>(label: &str, mut attempt_fn: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let backoff = BASE.saturating_mul(1 << attempt).min(CAP);
                let jitter = Duration::from_millis((u64::from(attempt) * 13) % 37);
                tracing::warn!(label, attempt, error = %e, "retrying after transient failure");
                tokio::time::sleep(backoff + jitter).await;
            }
            Err(e) if e.is_transient() => {
                return Err(AppError::FatalDownstream(format!(
                    "{label}: exhausted {MAX_ATTEMPTS} attempts: {e}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
