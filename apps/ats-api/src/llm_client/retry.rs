//! Bounded exponential backoff around a model call.
//!
//! Only `LlmError::Throttled` is retried. Anything else propagates on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::llm_client::LlmError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (0-based). Attempt 0 has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 1).min(16))
    }
}

/// Runs `call` until it succeeds, fails with a non-throttling error, or the
/// policy's attempts are exhausted. On exhaustion the last throttling error is returned.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_throttled() && attempt + 1 < attempts => {
                warn!(
                    "Model call throttled (attempt {}/{}), retrying after {}ms: {}",
                    attempt + 1,
                    attempts,
                    policy.delay_for(attempt + 1).as_millis(),
                    e
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
