use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// RetryClass
// ---------------------------------------------------------------------------

/// Explicit classification of infrastructure errors. Callers supply a
/// predicate mapping their error type into one of these kinds; anything
/// classified `NonRetryable` fails immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    ConnReset,
    ConnRefused,
    Timeout,
    Dns,
    RateLimited,
    Upstream5xx,
    ProviderBusy,
    NonRetryable,
}

impl RetryClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryClass::NonRetryable)
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Capped exponential backoff with symmetric jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Each delay is multiplied by a uniform factor in `1 ± jitter`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.3,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp.min(self.cap.as_millis() as f64);
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }
}

// ---------------------------------------------------------------------------
// with_retry
// ---------------------------------------------------------------------------

/// Run `f` with retries for transient failures.
///
/// `classify` decides whether an error is worth retrying; unclassified
/// (`NonRetryable`) errors surface immediately.
pub async fn with_retry<F, Fut, T, E, C>(
    config: &RetryConfig,
    operation_name: &str,
    classify: C,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> RetryClass,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt = attempt + 1, "retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                let class = classify(&e);
                if !class.is_retryable() || attempt + 1 == attempts {
                    return Err(e);
                }

                let backoff = config.backoff_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    class = ?class,
                    delay_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                last_error = Some(e);
            }
        }
    }

    // Unreachable in practice: the loop either returned Ok or the final Err.
    Err(last_error.expect("retry loop exited without an error"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
