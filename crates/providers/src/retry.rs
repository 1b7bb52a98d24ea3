//! Exponential backoff with jitter for transient vendor errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use es_domain::config::RetryConfig;
use es_domain::error::{Error, Result};

/// Retry policy: exponential backoff with uniform jitter. Non-transient
/// errors bypass retry entirely.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    factor: f64,
    max_attempts: u32,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_attempts: config.max_attempts.max(1),
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic delay for a zero-based attempt index, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(ms as u64)
    }

    /// Delay with uniform jitter drawn from `[0, jitter_ratio * delay]`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }
        let max_jitter = base.as_millis() as f64 * self.jitter_ratio;
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter.max(f64::MIN_POSITIVE));
        base + Duration::from_millis(jitter as u64)
    }

    /// Run `op` with retries. The closure receives the zero-based attempt
    /// index so each attempt can re-run provider selection.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<Error> = None;
        for attempt in 0..self.max_attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.jittered_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Other("retry budget exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            base_delay_ms: 1,
            factor: 2.0,
            max_attempts: attempts,
            jitter_ratio: 0.3,
        })
    }

    #[test]
    fn delays_grow_exponentially() {
        let p = RetryPolicy::from_config(&RetryConfig {
            base_delay_ms: 500,
            factor: 2.0,
            max_attempts: 3,
            jitter_ratio: 0.0,
        });
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let p = policy(3);
        for attempt in 0..3 {
            let base = p.delay_for(attempt);
            for _ in 0..50 {
                let jittered = p.jittered_delay(attempt);
                assert!(jittered >= base);
                assert!(jittered.as_millis() as f64 <= base.as_millis() as f64 * 1.3 + 1.0);
            }
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Timeout("slow vendor".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_bypass_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::InvalidFormat("bad audio".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let result: Result<()> = policy(2)
            .run(|_| async { Err(Error::Timeout("always slow".into())) })
            .await;
        assert!(matches!(result.unwrap_err(), Error::Timeout(_)));
    }
}
