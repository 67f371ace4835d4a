//! Retry delays with jitter for transient collaborator failures.
//!
//! Delay for retry `n` is `min(base + n * step, cap)` scaled by a random
//! factor in `[1 - jitter, 1 + jitter]` so workers retrying together spread
//! out instead of hitting the provider in lockstep.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;
use crate::types::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub step: Duration,
    pub cap: Duration,
    /// Relative jitter, 0.1 means ±10%
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            step: Duration::from_millis(1000),
            cap: Duration::from_millis(10_000),
            jitter: 0.1,
        }
    }
}

impl From<&PipelineConfig> for BackoffPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            step: Duration::from_millis(config.backoff_step_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
            ..Default::default()
        }
    }
}

impl BackoffPolicy {
    /// Delay before jitter is applied.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        self.base
            .saturating_add(self.step.saturating_mul(retry))
            .min(self.cap)
    }

    /// Delay with jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 - jitter + rand::random::<f64>() * 2.0 * jitter;
        self.nominal_delay(retry).mul_f64(factor)
    }

    /// Sleep for the jittered delay of retry `retry`.
    pub async fn wait_with_backoff(&self, retry: u32) -> Duration {
        let delay = self.delay_for(retry);
        tokio::time::sleep(delay).await;
        delay
    }

    /// Run `op`, retrying transient provider errors up to `max_retries` times.
    ///
    /// Non-transient errors and the last transient error are returned as-is.
    pub async fn retry<F, Fut, T>(
        &self,
        max_retries: u32,
        operation: &str,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    let delay = self.wait_with_backoff(attempt).await;
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retried after backoff"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_nominal_delay_is_linear_and_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.nominal_delay(9), Duration::from_millis(10_000));
        assert_eq!(policy.nominal_delay(50), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy::default();
        for retry in 0..20 {
            let nominal = policy.nominal_delay(retry).as_secs_f64();
            let actual = policy.delay_for(retry).as_secs_f64();
            assert!(actual >= nominal * 0.9 - 1e-9, "{actual} < {nominal}");
            assert!(actual <= nominal * 1.1 + 1e-9, "{actual} > {nominal}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = BackoffPolicy::default()
            .retry(3, "embed", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::RateLimited { service: "embedding" })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = BackoffPolicy::default()
            .retry(2, "embed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout { service: "embedding" })
            })
            .await;
        assert_eq!(result, Err(ProviderError::Timeout { service: "embedding" }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = BackoffPolicy::default()
            .retry(5, "upsert", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Rejected {
                    service: "vector_index",
                    message: "dimension mismatch".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
