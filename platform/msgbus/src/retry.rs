//! Retry with exponential backoff
//!
//! Used by long-lived sessions to re-establish themselves after a transient
//! failure (for example the inbound listener after its subscription ends).
//! Per-message delivery retries are not done here: `retry_count` is handed to
//! the gateway at registration and enforced there.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for re-establishing a session
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each one after
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Randomise each delay within `[backoff / 2, backoff]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Un-jittered delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self.backoff_for(retry);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let half = backoff / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(spread)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` tries have
/// failed, sleeping with exponential backoff in between. The last error is
/// returned when the budget runs out. `context` tags every log line.
///
/// ```rust
/// use msgbus::retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let policy = RetryConfig::default().with_jitter();
/// let subject = retry_with_backoff(
///     || async { Ok::<_, String>("billing.invoice.notify") },
///     &policy,
///     "listener_subscribe",
/// )
/// .await?;
/// # let _ = subject;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(context, attempt, "recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt == max_attempts {
            warn!(context, attempts = attempt, error = %err, "giving up");
            return Err(err);
        }

        let delay = config.delay_for(attempt);
        warn!(
            context,
            attempt,
            max_attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, backing off"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
