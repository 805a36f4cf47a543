//! Backoff policies and cancellable waits for resilient API calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::sources::SourceError;

/// Exponential backoff with a bounded attempt count and delay cap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Policy that never waits; handy for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    ///
    /// Non-decreasing in `retry` for any multiplier >= 1.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if secs.is_infinite() {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// How the fetcher should react to a source error
#[derive(Debug, Clone, PartialEq)]
pub enum RetryClass {
    /// The registry asked us to slow down (optional server hint)
    RateLimited(Option<Duration>),
    /// Network or server trouble worth retrying
    Transient,
    /// The request itself is wrong; retrying cannot help
    Permanent,
}

impl RetryClass {
    /// Classify a source error
    pub fn of(err: &SourceError) -> Self {
        match err {
            SourceError::RateLimit { retry_after } => RetryClass::RateLimited(*retry_after),
            SourceError::Network(_) | SourceError::Timeout | SourceError::Server { .. } => {
                RetryClass::Transient
            }
            SourceError::InvalidRequest(_) | SourceError::Parse(_) => RetryClass::Permanent,
        }
    }
}

/// Suspends the calling task; swapped for a virtual clock in tests
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual sleeper that records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct VirtualSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl VirtualSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for VirtualSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// The wait was interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Wait for `delay`, observing `cancel` before, during and after the sleep
pub async fn backoff_wait(
    sleeper: &dyn Sleeper,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => return Err(Cancelled),
        _ = sleeper.sleep(delay) => {}
    }

    if cancel.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = BackoffPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };

        let delays: Vec<Duration> = (1..=5).map(|r| policy.delay_for(r)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_delay_huge_retry_stays_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(10_000), policy.max_delay);
        assert_eq!(BackoffPolicy::immediate(3).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn test_allows_retry() {
        let policy = BackoffPolicy::immediate(3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_retry_class() {
        assert_eq!(
            RetryClass::of(&SourceError::RateLimit {
                retry_after: Some(Duration::from_secs(3))
            }),
            RetryClass::RateLimited(Some(Duration::from_secs(3)))
        );
        assert_eq!(
            RetryClass::of(&SourceError::Network("reset".to_string())),
            RetryClass::Transient
        );
        assert_eq!(
            RetryClass::of(&SourceError::Server { status: 503 }),
            RetryClass::Transient
        );
        assert_eq!(
            RetryClass::of(&SourceError::InvalidRequest("bad".to_string())),
            RetryClass::Permanent
        );
    }

    #[tokio::test]
    async fn test_backoff_wait_records_virtual_time() {
        let sleeper = VirtualSleeper::new();
        let cancel = CancellationToken::new();

        backoff_wait(&sleeper, Duration::from_secs(30), &cancel)
            .await
            .unwrap();

        assert_eq!(sleeper.delays(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn test_backoff_wait_cancelled_before_sleep() {
        let sleeper = VirtualSleeper::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = backoff_wait(&sleeper, Duration::from_secs(30), &cancel).await;

        assert_eq!(result, Err(Cancelled));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_wait_cancelled_during_real_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = backoff_wait(&TokioSleeper, Duration::from_secs(60), &cancel).await;

        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
