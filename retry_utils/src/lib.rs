use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How a failed RPC call should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableError {
    /// HTTP 429 or provider "limit exceeded" responses; backoff is doubled again
    RateLimit,
    /// 5xx, connection resets, request timeouts
    Transient,
    /// Malformed request, revert, decode failure; never retried
    Fatal,
}

/// Errors that know their own retry class
pub trait Classify {
    fn classify(&self) -> RetryableError;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled per retry
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// No retries at all; used by tests and one-shot calls
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (0-based), or None when the error
    /// must not be retried.
    pub fn delay_for(&self, retry: u32, class: RetryableError) -> Option<Duration> {
        let factor = match class {
            RetryableError::Fatal => return None,
            RetryableError::Transient => 1u64,
            RetryableError::RateLimit => 2u64,
        };

        let exp = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(exp)
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        Some(Duration::from_millis(delay))
    }
}

/// Run `operation` until it succeeds, hits a fatal error or runs out of
/// retries. `label` names the call in log lines.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!("{} succeeded after {} retries", label, retry);
                }
                return Ok(value);
            }
            Err(e) => {
                let class = e.classify();

                if retry >= config.max_retries {
                    if config.max_retries > 0 {
                        error!("{} failed after {} attempts: {}", label, retry + 1, e);
                    }
                    return Err(e);
                }

                let delay = match config.delay_for(retry, class) {
                    Some(d) => d,
                    None => {
                        debug!("{} failed with non-retryable error: {}", label, e);
                        return Err(e);
                    }
                };

                warn!(
                    "{} failed (attempt {}/{}): {} - retrying in {}ms ({:?})",
                    label,
                    retry + 1,
                    config.max_retries + 1,
                    e,
                    delay.as_millis(),
                    class
                );

                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}
