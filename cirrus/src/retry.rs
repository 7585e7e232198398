//! Bounded retry and backoff with an injectable clock.
//!
//! Backend calls and terminal-status polling both wait with exponential
//! backoff. The waiting is expressed as explicit state (attempt count,
//! computed delay) over a [`Clock`] seam so it is cancellable and testable
//! without real time delays.

use crate::errors::BackendError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub multiplier: u32,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to draw each delay uniformly from 0..=computed.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Computes the delay for a 0-indexed attempt, capped and jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.min(u32::MAX as usize) as u32);
        let delay = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        let jittered = if self.jitter && delay > 0 {
            rand::thread_rng().gen_range(0..=delay)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }
}

/// Retry policy for backend calls that fail transiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Backoff between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Polling policy for awaiting a terminal operation status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Backoff between poll checkpoints.
    pub backoff: BackoffConfig,
    /// Ceiling on total wait; exceeding it marks the stack Failed.
    pub max_wait_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig {
                base_delay_ms: 500,
                multiplier: 2,
                max_delay_ms: 15_000,
                jitter: true,
            },
            max_wait_ms: 30 * 60 * 1000,
        }
    }
}

/// Time source seam so waits are testable without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspends for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// The real tokio-backed clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs a backend call, retrying transient failures with backoff.
///
/// Permanent failures return immediately; transient failures are retried
/// up to `config.max_attempts` total attempts, then the last transient
/// error is returned.
///
/// # Errors
///
/// Returns the final [`BackendError`] once retries are exhausted or a
/// permanent error occurs.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    clock: &dyn Clock,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<T, BackendError>> + Send,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = config.backoff.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying transient backend error"
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
