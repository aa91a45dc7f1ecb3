//! Retry with jittered exponential backoff for LLM calls.
//!
//! Transient transport failures and transient semantic failures (empty
//! choices, unparseable JSON in structured modes) retry alike; cancellation
//! and non-transient errors abort immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryOptions {
    /// Backoff for the given attempt (0-indexed), with ~25% deterministic
    /// jitter.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64;
        let exp_ms = base_ms * 2f64.powi(attempt.min(30) as i32);
        let capped = exp_ms.min(self.max_backoff.as_millis() as f64);
        let hash = attempt.wrapping_mul(2654435761);
        let jitter = capped * 0.25 * (hash as f64 / u32::MAX as f64);
        Duration::from_millis((capped + jitter) as u64)
    }
}

/// Run `op` until it succeeds, retries are exhausted, a non-transient error
/// appears, or the token is cancelled.
pub async fn call_with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    opts: &RetryOptions,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = opts.max_retries.max(1);
    let mut last_err = Error::Llm("llm call not attempted".into());

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op().await {
            Ok(v) => return Ok(v),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                last_err = e;
            }
        }

        if attempt + 1 >= attempts {
            break;
        }

        let backoff = opts.backoff_for_attempt(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max = attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %last_err,
            "llm transient failure, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
    }

    Err(last_err)
}
