use crate::logger::*;
use crate::metrics::{Metric, MetricsRecorder};
use anyhow::anyhow;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Register,
    Refresh,
    Logout,
    Revoke,
    Default,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Login,
        Endpoint::Register,
        Endpoint::Refresh,
        Endpoint::Logout,
        Endpoint::Revoke,
        Endpoint::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Register => "register",
            Endpoint::Refresh => "refresh",
            Endpoint::Logout => "logout",
            Endpoint::Revoke => "revoke",
            Endpoint::Default => "default",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sustained rate and burst for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub per_second: u32,
    pub burst: u32,
}

impl EndpointLimit {
    pub const fn new(per_second: u32, burst: u32) -> Self {
        Self { per_second, burst }
    }

    pub fn default_for(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Login => Self::new(3, 3),
            Endpoint::Register => Self::new(2, 1),
            Endpoint::Refresh => Self::new(1, 3),
            Endpoint::Logout => Self::new(1, 2),
            Endpoint::Revoke => Self::new(1, 2),
            Endpoint::Default => Self::new(10, 20),
        }
    }

    fn quota(&self) -> anyhow::Result<Quota> {
        let rate = NonZeroU32::new(self.per_second)
            .ok_or_else(|| anyhow!("rate limit per_second must be > 0"))?;
        let burst =
            NonZeroU32::new(self.burst).ok_or_else(|| anyhow!("rate limit burst must be > 0"))?;
        Ok(Quota::per_second(rate).allow_burst(burst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limited on {endpoint}")]
pub struct RateLimited {
    pub endpoint: Endpoint,
}

/// One token bucket per (endpoint, client address). Rejection is immediate;
/// nothing queues.
pub struct EndpointRateLimiter {
    limiters: HashMap<Endpoint, DefaultKeyedRateLimiter<IpAddr>>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl EndpointRateLimiter {
    /// Endpoints missing from `limits` use [`EndpointLimit::default_for`].
    pub fn new(
        limits: &HashMap<Endpoint, EndpointLimit>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> anyhow::Result<Self> {
        let mut limiters = HashMap::new();
        for endpoint in Endpoint::ALL {
            let limit = limits
                .get(&endpoint)
                .copied()
                .unwrap_or_else(|| EndpointLimit::default_for(endpoint));
            let quota = limit
                .quota()
                .map_err(|e| anyhow!("endpoint {endpoint}: {e}"))?;
            limiters.insert(endpoint, RateLimiter::keyed(quota));
        }
        Ok(Self { limiters, metrics })
    }

    pub fn with_defaults(metrics: Arc<dyn MetricsRecorder>) -> anyhow::Result<Self> {
        Self::new(&HashMap::new(), metrics)
    }

    pub fn check(&self, endpoint: Endpoint, client: IpAddr) -> Result<(), RateLimited> {
        let Some(limiter) = self.limiters.get(&endpoint) else {
            return Ok(());
        };
        match limiter.check_key(&client) {
            Ok(()) => Ok(()),
            Err(_) => {
                debug!(%endpoint, %client, "request rate limited");
                self.metrics.incr(Metric::RateLimited);
                Err(RateLimited { endpoint })
            }
        }
    }

    /// Drops buckets that have refilled completely.
    pub fn retain_recent(&self) {
        for limiter in self.limiters.values() {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiters.values().map(|l| l.len()).sum()
    }
}
