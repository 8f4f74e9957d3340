use crate::domain_port::*;
use crate::logger::*;
use crate::metrics::{Metric, MetricsRecorder};
use crate::rate_limit::EndpointRateLimiter;
use crate::resilience::Resilience;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of one cleanup pass. `None` means that store's pass failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub refresh_deleted: Option<u64>,
    pub revoked_deleted: Option<u64>,
}

pub struct CleanupScheduler {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    revoked_tokens: Arc<dyn RevokedTokenStore>,
    resilience: Resilience,
    metrics: Arc<dyn MetricsRecorder>,
    rate_limiter: Option<Arc<EndpointRateLimiter>>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl CleanupScheduler {
    /// `cancellation_token` stops the tick loop. A pass already running is
    /// never cut short by it: the store calls retry under their own token.
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        revoked_tokens: Arc<dyn RevokedTokenStore>,
        resilience: Resilience,
        metrics: Arc<dyn MetricsRecorder>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            refresh_tokens,
            revoked_tokens,
            resilience: resilience.with_cancellation(CancellationToken::new()),
            metrics,
            rate_limiter: None,
            interval,
            cancellation_token,
        }
    }

    /// Idle rate-limiter buckets are reclaimed after every pass.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<EndpointRateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    async fn purge<F, Fut>(&self, op_name: &'static str, deleted: Metric, op: F) -> Option<u64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<u64>>,
    {
        match self.resilience.call(op_name, op).await {
            Ok(n) => {
                info!(op = op_name, deleted = n, "cleanup pass finished");
                self.metrics.add(deleted, n);
                Some(n)
            }
            Err(e) => {
                error!(op = op_name, error = %e, "cleanup pass failed");
                self.metrics.incr(Metric::CleanupFailed);
                None
            }
        }
    }

    /// One pass over both stores. Each store is attempted even if the other
    /// fails.
    pub async fn run_once(&self) -> CleanupReport {
        let refresh_deleted = self
            .purge(
                "refresh_tokens.delete_expired",
                Metric::CleanupRefreshDeleted,
                || self.refresh_tokens.delete_expired(),
            )
            .await;
        let revoked_deleted = self
            .purge(
                "revoked_tokens.delete_expired",
                Metric::CleanupRevokedDeleted,
                || self.revoked_tokens.delete_expired(),
            )
            .await;

        if let Some(limiter) = &self.rate_limiter {
            limiter.retain_recent();
            debug!(clients = limiter.tracked_clients(), "rate limiter buckets retained");
        }

        CleanupReport {
            refresh_deleted,
            revoked_deleted,
        }
    }

    /// Ticks every `interval`, first tick one interval after start.
    /// Cancellation is only observed between passes.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "cleanup scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    info!("cleanup scheduler shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
