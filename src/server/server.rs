use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::infra_fake::*;
use crate::infra_mysql::*;
use crate::logger::*;
use crate::metrics::*;
use crate::rate_limit::*;
use crate::resilience::*;
use crate::server::*;
use crate::settings::{Settings, StorageBackend};
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub rate_limiter: Arc<EndpointRateLimiter>,
    pub admin_key: AdminKey,
    pub trust_forwarded_for: bool,
    pub metrics: Arc<dyn MetricsRecorder>,
    cleanup: Arc<CleanupScheduler>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    cleanup_shutdown_timeout: Duration,
    cancel: CancellationToken,
    pool: Option<MySqlPool>,
    pool_close_timeout: Duration,
}

fn build_stores(
    backend: StorageBackend,
    pool: Option<&MySqlPool>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AuthStores> {
    let stores = match (backend, pool) {
        (StorageBackend::Fake, _) => AuthStores {
            users: Arc::new(FakeUserRepo::new()),
            refresh_tokens: Arc::new(FakeRefreshTokenStore::new(clock.clone())),
            revoked_tokens: Arc::new(FakeRevokedTokenStore::new(clock)),
            cutoffs: Arc::new(FakeRevocationCutoffStore::new()),
        },
        (StorageBackend::Mysql, Some(pool)) => AuthStores {
            users: Arc::new(MySqlUserRepo::new(pool.clone())),
            refresh_tokens: Arc::new(MySqlRefreshTokenStore::new(pool.clone(), clock.clone())),
            revoked_tokens: Arc::new(MySqlRevokedTokenStore::new(pool.clone(), clock)),
            cutoffs: Arc::new(MySqlRevocationCutoffStore::new(pool.clone())),
        },
        (StorageBackend::Mysql, None) => {
            return Err(anyhow::anyhow!("mysql backend selected without a pool"));
        }
    };
    Ok(stores)
}

fn rate_limits(settings: &Settings) -> HashMap<Endpoint, EndpointLimit> {
    let r = &settings.rate_limit;
    [
        (Endpoint::Login, r.login),
        (Endpoint::Register, r.register),
        (Endpoint::Refresh, r.refresh),
        (Endpoint::Logout, r.logout),
        (Endpoint::Revoke, r.revoke),
        (Endpoint::Default, r.default),
    ]
    .into_iter()
    .map(|(endpoint, l)| (endpoint, EndpointLimit::new(l.per_second, l.burst)))
    .collect()
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let metrics: Arc<dyn MetricsRecorder> = Arc::new(TracingMetrics);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancellationToken::new();

        let storage = &settings.storage;
        let pool = match storage.backend {
            StorageBackend::Fake => {
                warn!("using in-memory storage, nothing survives a restart");
                None
            }
            StorageBackend::Mysql => Some(
                connect_with_retry(&PoolConfig {
                    dsn: storage.dsn.clone(),
                    max_connections: storage.max_connections,
                    min_connections: storage.min_connections,
                    acquire_timeout: Duration::from_secs(storage.acquire_timeout_secs),
                    idle_timeout: Duration::from_secs(storage.idle_timeout_secs),
                    max_lifetime: Duration::from_secs(storage.max_lifetime_secs),
                    connect_attempts: storage.connect_attempts,
                    connect_retry_delay: Duration::from_millis(storage.connect_retry_delay_ms),
                })
                .await?,
            ),
        };
        let stores = build_stores(storage.backend, pool.as_ref(), clock.clone())?;

        let r = &settings.resilience;
        let resilience = Resilience::new(
            CircuitBreakerConfig {
                threshold: r.breaker_threshold,
                timeout: Duration::from_millis(r.breaker_timeout_ms),
                reset_after: Duration::from_millis(r.breaker_reset_after_ms),
            },
            RetryPolicy {
                max_attempts: r.retry_max_attempts,
                initial_delay: Duration::from_millis(r.retry_initial_delay_ms),
                max_delay: Duration::from_millis(r.retry_max_delay_ms),
                multiplier: r.retry_multiplier,
            },
            Duration::from_millis(storage.query_timeout_ms),
            cancel.clone(),
            metrics.clone(),
        );

        let auth = &settings.auth;
        let credential_hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2PasswordHasher::with_cost(
            auth.argon2_memory_kib,
            auth.argon2_iterations,
            auth.argon2_parallelism,
        )?);
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(JwtConfig {
            issuer: settings.jwt.issuer.clone(),
            audience: settings.jwt.audience.clone(),
            access_ttl: chrono::Duration::seconds(settings.jwt.access_ttl_secs),
            signing_key: settings.jwt.secret.clone().into_bytes(),
        })?);
        let refresh_secrets = RefreshSecretHasher::new(auth.refresh_pepper.as_bytes())?;

        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            stores.clone(),
            credential_hasher,
            token_codec,
            refresh_secrets,
            resilience.clone(),
            clock,
            metrics.clone(),
            AuthPolicy {
                refresh_ttl: chrono::Duration::seconds(auth.refresh_ttl_secs),
                max_refresh_tokens_per_user: auth.max_refresh_tokens_per_user,
                username_len: (auth.username_min, auth.username_max),
                password_len: (auth.password_min, auth.password_max),
                enforce_revocation_cutoff: auth.enforce_revocation_cutoff,
            },
        ));

        let rate_limiter = Arc::new(EndpointRateLimiter::new(
            &rate_limits(settings),
            metrics.clone(),
        )?);

        // region runtime infra
        let cleanup = Arc::new(
            CleanupScheduler::new(
                stores.refresh_tokens.clone(),
                stores.revoked_tokens.clone(),
                resilience,
                metrics.clone(),
                Duration::from_secs(settings.cleanup.interval_secs),
                cancel.clone(),
            )
            .with_rate_limiter(rate_limiter.clone()),
        );
        let cleanup_handle = tokio::spawn({
            let cleanup = cleanup.clone();
            async move { cleanup.run().await }
        });
        // endregion

        info!(backend = ?storage.backend, "server started");

        Ok(Self {
            auth_service,
            rate_limiter,
            admin_key: AdminKey::new(&auth.admin_key)?,
            trust_forwarded_for: settings.http.trust_forwarded_for,
            metrics,
            cleanup,
            cleanup_handle: Mutex::new(Some(cleanup_handle)),
            cleanup_shutdown_timeout: Duration::from_secs(settings.cleanup.shutdown_timeout_secs),
            cancel,
            pool,
            pool_close_timeout: Duration::from_secs(storage.close_timeout_secs),
        })
    }

    /// Runs one cleanup pass immediately, outside the timer.
    pub async fn cleanup_now(&self) -> CleanupReport {
        self.cleanup.run_once().await
    }

    /// Cancels background work and closes the pool. Each phase has its own
    /// bound; a phase that overruns is logged and skipped.
    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handle = match self.cleanup_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            match tokio::time::timeout(self.cleanup_shutdown_timeout, handle).await {
                Ok(r) => info!("cleanup handle dropped: {:?}", r),
                Err(_) => warn!("cleanup scheduler did not stop in time"),
            }
        }

        if let Some(pool) = &self.pool {
            match tokio::time::timeout(self.pool_close_timeout, pool.close()).await {
                Ok(()) => info!("database pool closed"),
                Err(_) => warn!("database pool close timed out"),
            }
        }
    }
}
