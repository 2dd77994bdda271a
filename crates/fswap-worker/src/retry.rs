//! Bounded exponential backoff for flaky external calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay, doubled per attempt
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
    /// Operation name for logging
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or attempts run out. A failure only
/// gets another attempt when `should_retry` says so; permanent errors
/// surface immediately.
pub async fn retry_async_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "{} succeeded on attempt {}",
                        config.operation_name, attempt
                    );
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_attempts && should_retry(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempts: {}",
                    config.operation_name, attempt, e
                );
                return Err(e);
            }
        }
    }
}

/// Suppresses log spam from background loops that fail repeatedly.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            debug!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failure; returns whether it should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures <= self.max_logged_failures
    }
}
