//! Bounded retry with exponential backoff, jitter and per-call timeouts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::PipelineConfig;
use crate::embed::ProviderError;
use crate::store::StoreError;

/// Errors that can say whether another attempt may succeed.
pub(crate) trait Transient: Display {
    fn is_transient(&self) -> bool;
    fn timed_out() -> Self;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }

    fn timed_out() -> Self {
        Self::Timeout
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn timed_out() -> Self {
        Self::Timeout
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Exponential delay before retry `attempt` (0-based), capped, without jitter.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Backoff plus up to half of it again in random jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let half = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        base + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `call_timeout`; a timeout counts as transient.
    pub(crate) async fn run<T, E, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, E>
    where
        E: Transient,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let err = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => E::timed_out(),
            };
            attempt += 1;
            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }
            let delay = self.delay(attempt - 1);
            tracing::warn!(
                op = what,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(4);
        assert_eq!(p.backoff(0), Duration::from_millis(10));
        assert_eq!(p.backoff(1), Duration::from_millis(20));
        assert_eq!(p.backoff(3), Duration::from_millis(80));
        assert_eq!(p.backoff(4), Duration::from_millis(100));
        assert_eq!(p.backoff(40), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_half() {
        let p = policy(4);
        for attempt in 0..5 {
            let d = p.delay(attempt);
            let b = p.backoff(attempt);
            assert!(d >= b && d <= b + b / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let calls = AtomicU32::new(0);
        let out: Result<u32, ProviderError> = policy(4)
            .run("embed", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::RateLimited)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), ProviderError> = policy(4)
            .run("embed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::InvalidInput("bad".into())) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), StoreError> = policy(3)
            .run("upsert", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Unavailable("down".into())) }
            })
            .await;
        assert!(matches!(out, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_transient() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy {
            call_timeout: Duration::from_millis(50),
            ..policy(2)
        };
        let out: Result<(), ProviderError> = p
            .run("embed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(out, Err(ProviderError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
