use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{GroundingError, GroundingResult};
use crate::perception::types::ProviderFamily;

/// A vision-language backend that describes a screenshot as text.
///
/// Implementations own transport concerns (auth, timeouts, retries); the
/// returned text goes to the response parser untouched.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// How this backend formats its output, which selects the parse strategies.
    fn family(&self) -> ProviderFamily;

    async fn describe(&self, image_png: &[u8], prompt: &str) -> GroundingResult<String>;
}

/// Delay before retry number `attempt` (1-based): 2 s, 4 s, 8 s, capped at 10 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(16)).clamp(2, 10);
    Duration::from_secs(secs)
}

/// Run `op` up to `max_attempts` times with exponential backoff between
/// failures. Configuration errors are not retried.
pub async fn with_retry<T, F, Fut>(
    backend: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> GroundingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GroundingResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ GroundingError::Config(_)) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(backend, attempt, error = %e, "backend call failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff_delay(attempt).mul_f64(base_delay.as_secs_f64());
                tracing::warn!(backend, attempt, ?delay, error = %e, "backend call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
