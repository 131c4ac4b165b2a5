use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Used for terminal writes, where giving up leaves the attempt open.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_max: None,
        }
    }

    /// Delay before retry number `retry` (1-based): doubled per retry, capped,
    /// plus uniform jitter.
    fn delay_before(&self, retry: u32) -> Duration {
        let doubled = self
            .base_backoff
            .checked_mul(1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff);
        let backoff = doubled.min(self.max_backoff);

        let jitter = match self.jitter_max {
            Some(max) if !max.is_zero() => {
                let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::rng().random_range(0..=max_ms))
            }
            _ => Duration::ZERO,
        };
        backoff + jitter
    }
}

/// Runs `f` until it succeeds or `max_attempts` calls have failed (at least
/// one call is always made). The last error is returned.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = u32::try_from(config.max_attempts.max(1)).unwrap_or(u32::MAX);
    let mut retry = 0;

    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        retry += 1;
        if retry >= attempts {
            tracing::debug!("Giving up after {} attempts: {}", attempts, err);
            return Err(err);
        }

        let wait = config.delay_before(retry);
        tracing::debug!(
            "Attempt {}/{} failed, retrying in {:?}: {}",
            retry,
            attempts,
            wait,
            err
        );
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
