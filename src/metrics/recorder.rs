use dashmap::DashMap;
use std::fmt;

/// Events the token subsystem reports. Counters only; the backend decides how
/// to aggregate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    LoginSucceeded,
    LoginFailed,
    Registered,
    RefreshRotated,
    RefreshReplayRejected,
    RefreshExpired,
    RefreshEvicted,
    AccessRejected,
    LogoutCompleted,
    UserTokensRevoked,
    RetryAttempt,
    CircuitOpened,
    CircuitRejected,
    CleanupRefreshDeleted,
    CleanupRevokedDeleted,
    CleanupFailed,
    RateLimited,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::LoginSucceeded => "auth.login.succeeded",
            Metric::LoginFailed => "auth.login.failed",
            Metric::Registered => "auth.register.succeeded",
            Metric::RefreshRotated => "auth.refresh.rotated",
            Metric::RefreshReplayRejected => "auth.refresh.replay_rejected",
            Metric::RefreshExpired => "auth.refresh.expired",
            Metric::RefreshEvicted => "auth.refresh.evicted",
            Metric::AccessRejected => "auth.access.rejected",
            Metric::LogoutCompleted => "auth.logout.completed",
            Metric::UserTokensRevoked => "auth.revoke_all.completed",
            Metric::RetryAttempt => "store.retry.attempt",
            Metric::CircuitOpened => "store.circuit.opened",
            Metric::CircuitRejected => "store.circuit.rejected",
            Metric::CleanupRefreshDeleted => "cleanup.refresh_tokens.deleted",
            Metric::CleanupRevokedDeleted => "cleanup.revoked_tokens.deleted",
            Metric::CleanupFailed => "cleanup.failed",
            Metric::RateLimited => "http.rate_limited",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Injected into every component that reports; there is no global registry.
pub trait MetricsRecorder: Send + Sync {
    fn add(&self, metric: Metric, value: u64);

    fn incr(&self, metric: Metric) {
        self.add(metric, 1);
    }
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn add(&self, _metric: Metric, _value: u64) {}
}

/// Emits each sample as a `tracing` event on the `metrics` target, so a log
/// pipeline can aggregate them.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    fn add(&self, metric: Metric, value: u64) {
        tracing::debug!(target: "metrics", metric = metric.name(), value);
    }
}

/// Keeps running totals in memory.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: DashMap<Metric, u64>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: Metric) -> u64 {
        self.counters.get(&metric).map(|v| *v).unwrap_or(0)
    }
}

impl MetricsRecorder for CountingMetrics {
    fn add(&self, metric: Metric, value: u64) {
        *self.counters.entry(metric).or_insert(0) += value;
    }
}
