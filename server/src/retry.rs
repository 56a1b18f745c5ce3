use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Distinguishes failures worth another attempt from terminal ones.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Transient error (network issues, backend 5xx, timeouts)
    Retryable(E),
    /// Terminal error, surfaced immediately
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retryable(e) | RetryError::NonRetryable(e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum jitter to add to backoff delay (as fraction of delay, e.g., 0.25 = ±25%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            jitter_factor: 0.25,
        }
    }
}

#[cfg(test)]
impl RetryConfig {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryConfig {
            max_attempts,
            base_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }
}

/// Runs `func` until it succeeds, fails terminally, or the attempt budget
/// is spent. The last retryable error is returned on exhaustion.
pub async fn with_retry<F, Fut, T, E>(func: F, config: &RetryConfig) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match func().await {
            Ok(result) => return Ok(result),
            Err(RetryError::Retryable(err)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    log::warn!("Giving up after {} attempts: {}", attempt, err);
                    return Err(RetryError::Retryable(err));
                }
                let delay = backoff_with_jitter(attempt, config);
                log::warn!(
                    "Retryable error: {}; retry attempt {}/{} after {:?}",
                    err,
                    attempt + 1,
                    max_attempts,
                    delay
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Calculate backoff delay with jitter for a given attempt.
///
/// Uses exponential backoff: base_delay * 2^attempt
/// Adds random jitter of ±jitter_factor to prevent thundering herd.
fn backoff_with_jitter(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = (base_delay as f64 * config.jitter_factor) as u64;
    if jitter_range == 0 {
        return Duration::from_millis(base_delay);
    }
    let jitter = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    let delay_ms = (base_delay as i64 + jitter).max(0) as u64;
    Duration::from_millis(delay_ms)
}
