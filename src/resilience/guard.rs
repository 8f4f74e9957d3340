use super::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::domain_port::StoreError;
use crate::metrics::MetricsRecorder;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Protection applied to every store call:
/// `breaker(timeout_b, retry(timeout_q(op)))`.
///
/// The retry loop is innermost so that a burst of transient errors within one
/// logical call counts as a single breaker fault.
#[derive(Clone)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    query_timeout: Duration,
    cancel: CancellationToken,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Resilience {
    pub fn new(
        breaker_cfg: CircuitBreakerConfig,
        retry: RetryPolicy,
        query_timeout: Duration,
        cancel: CancellationToken,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new("database", breaker_cfg, metrics.clone())),
            retry,
            query_timeout,
            cancel,
            metrics,
        }
    }

    /// Same breaker and policy, with retry backoff bound to `cancel` instead.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn call<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let query_timeout = self.query_timeout;
        let attempts = self
            .retry
            .run(op_name, &self.cancel, self.metrics.as_ref(), || {
                let fut = op();
                async move {
                    match tokio::time::timeout(query_timeout, fut).await {
                        Ok(r) => r,
                        Err(_) => Err(StoreError::Timeout),
                    }
                }
            });
        self.breaker.call(attempts).await
    }
}
