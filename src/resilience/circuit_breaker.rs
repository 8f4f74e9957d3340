use crate::domain_port::StoreError;
use crate::logger::*;
use crate::metrics::{Metric, MetricsRecorder};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive faults that open the circuit.
    pub threshold: u32,
    /// Bound on a single protected call.
    pub timeout: Duration,
    /// How long the circuit stays open after the last fault.
    pub reset_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(10),
            reset_after: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Open, but `reset_after` has passed; the next call is a probe.
    HalfOpen,
}

/// Lock-free circuit breaker.
///
/// Two concurrent callers may both see `Closed` just before the threshold is
/// crossed; the per-call timeout bounds what that costs.
pub struct CircuitBreaker {
    name: &'static str,
    cfg: CircuitBreakerConfig,
    failures: AtomicU32,
    // Milliseconds since `epoch`, plus one; zero means "never failed".
    last_failure: AtomicU64,
    epoch: Instant,
    metrics: Arc<dyn MetricsRecorder>,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        cfg: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            name,
            cfg,
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            epoch: Instant::now(),
            metrics,
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.failures.load(Ordering::Acquire) < self.cfg.threshold {
            return CircuitState::Closed;
        }
        let last = self.last_failure.load(Ordering::Acquire);
        let since_epoch = Duration::from_millis(last.saturating_sub(1));
        let elapsed = self.epoch.elapsed().saturating_sub(since_epoch);
        if elapsed >= self.cfg.reset_after {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Runs `fut` unless the circuit is open.
    ///
    /// Faults (see [`StoreError::is_fault`]) and timeouts are counted; any
    /// other outcome except cancellation counts as a success and closes the
    /// circuit.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if self.state() == CircuitState::Open {
            self.metrics.incr(Metric::CircuitRejected);
            return Err(StoreError::CircuitOpen);
        }

        match tokio::time::timeout(self.cfg.timeout, fut).await {
            Err(_) => {
                self.record_failure();
                Err(StoreError::Timeout)
            }
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) if e.is_fault() => {
                self.record_failure();
                Err(e)
            }
            Ok(Err(StoreError::Cancelled)) => Err(StoreError::Cancelled),
            Ok(Err(e)) => {
                self.record_success();
                Err(e)
            }
        }
    }

    fn record_success(&self) {
        let prev = self.failures.swap(0, Ordering::AcqRel);
        if prev >= self.cfg.threshold {
            info!(breaker = self.name, "circuit closed");
        }
    }

    fn record_failure(&self) {
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        self.last_failure.store(now, Ordering::Release);
        let count = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if count == self.cfg.threshold {
            warn!(breaker = self.name, failures = count, "circuit opened");
            self.metrics.incr(Metric::CircuitOpened);
        }
    }
}
