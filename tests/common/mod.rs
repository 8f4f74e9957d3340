#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokenkeeper::application_impl::*;
use tokenkeeper::application_port::*;
use tokenkeeper::domain_model::*;
use tokenkeeper::domain_port::*;
use tokenkeeper::infra_fake::*;
use tokenkeeper::metrics::CountingMetrics;
use tokenkeeper::resilience::*;
use tokio_util::sync::CancellationToken;

pub const PASSWORD: &str = "correct horse battery";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Revoked-token store whose availability can be switched off.
pub struct FlakyRevokedStore {
    inner: FakeRevokedTokenStore,
    down: AtomicBool,
    calls: AtomicU32,
}

impl FlakyRevokedStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: FakeRevokedTokenStore::new(clock),
            down: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn gate(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RevokedTokenStore for FlakyRevokedStore {
    async fn revoke(
        &self,
        jti: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.revoke(jti, user_id, expires_at).await
    }

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        self.gate()?;
        self.inner.is_revoked(jti).await
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        self.gate()?;
        self.inner.delete_expired().await
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub refresh: Arc<FakeRefreshTokenStore>,
    pub revoked: Arc<FlakyRevokedStore>,
    pub cutoffs: Arc<FakeRevocationCutoffStore>,
    pub metrics: Arc<CountingMetrics>,
    pub codec: Arc<JwtHs256Codec>,
    pub resilience: Resilience,
    pub cancel: CancellationToken,
    pub service: RealAuthService,
    pub policy: AuthPolicy,
}

pub struct HarnessBuilder {
    policy: AuthPolicy,
    breaker: CircuitBreakerConfig,
    retry: RetryPolicy,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            policy: AuthPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                multiplier: 2.0,
            },
        }
    }

    pub fn policy(mut self, f: impl FnOnce(&mut AuthPolicy)) -> Self {
        f(&mut self.policy);
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(epoch()));
        let refresh = Arc::new(FakeRefreshTokenStore::new(clock.clone()));
        let revoked = Arc::new(FlakyRevokedStore::new(clock.clone()));
        let cutoffs = Arc::new(FakeRevocationCutoffStore::new());
        let metrics = Arc::new(CountingMetrics::new());
        let cancel = CancellationToken::new();

        let codec = Arc::new(
            JwtHs256Codec::new(JwtConfig {
                issuer: "tokenkeeper.test".into(),
                audience: "chat-client".into(),
                access_ttl: chrono::Duration::minutes(15),
                signing_key: b"integration-signing-key-0123456789abcdef".to_vec(),
            })
            .unwrap(),
        );
        let resilience = Resilience::new(
            self.breaker,
            self.retry,
            Duration::from_secs(2),
            cancel.clone(),
            metrics.clone(),
        );

        let service = RealAuthService::new(
            AuthStores {
                users: Arc::new(FakeUserRepo::new()),
                refresh_tokens: refresh.clone(),
                revoked_tokens: revoked.clone(),
                cutoffs: cutoffs.clone(),
            },
            Arc::new(Argon2PasswordHasher::with_cost(1024, 1, 1).unwrap()),
            codec.clone(),
            RefreshSecretHasher::new(b"integration-pepper").unwrap(),
            resilience.clone(),
            clock.clone(),
            metrics.clone(),
            self.policy.clone(),
        );

        Harness {
            clock,
            refresh,
            revoked,
            cutoffs,
            metrics,
            codec,
            resilience,
            cancel,
            service,
            policy: self.policy,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    pub async fn register(&self, username: &str) -> UserId {
        self.service
            .signup(SignupInput {
                username: username.into(),
                password: PASSWORD.into(),
            })
            .await
            .unwrap()
    }

    pub async fn login(&self, username: &str) -> LoginResult {
        self.service
            .login(LoginInput {
                username: username.into(),
                password: PASSWORD.into(),
            })
            .await
            .unwrap()
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }
}
