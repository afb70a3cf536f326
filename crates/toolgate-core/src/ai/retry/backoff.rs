use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::GatewayError;

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), with up to 25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=0.25) * capped;
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Whether an error is worth another attempt
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// 408, 429 and 5xx are transient; everything else is the caller's fault.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl IsRetryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::BackendUnavailable(_) => true,
            GatewayError::BackendStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: IsRetryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && e.is_retryable() => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
