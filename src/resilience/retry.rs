use crate::domain_port::StoreError;
use crate::logger::*;
use crate::metrics::{Metric, MetricsRecorder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based):
    /// `initial_delay * multiplier^retry`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. A cancellation observed during a backoff sleep
    /// returns `Cancelled` at once.
    pub async fn run<T, F, Fut>(
        &self,
        op_name: &'static str,
        cancel: &CancellationToken,
        metrics: &dyn MetricsRecorder,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(op = op_name, attempts = attempt, error = %err, "retries exhausted");
                return Err(StoreError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt - 1);
            debug!(
                op = op_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            metrics.incr(Metric::RetryAttempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
