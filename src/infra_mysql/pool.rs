use crate::logger::*;
use anyhow::anyhow;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dsn: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
}

fn pool_options(cfg: &PoolConfig) -> MySqlPoolOptions {
    MySqlPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .idle_timeout(Some(cfg.idle_timeout))
        .max_lifetime(Some(cfg.max_lifetime))
}

/// Connects with a fixed number of attempts and a fixed delay between them.
/// Giving up is fatal for the caller: the service does not run without
/// storage.
pub async fn connect_with_retry(cfg: &PoolConfig) -> anyhow::Result<MySqlPool> {
    let attempts = cfg.connect_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match pool_options(cfg).connect(&cfg.dsn).await {
            Ok(pool) => {
                info!(attempt, "database pool connected");
                return Ok(pool);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "database connect failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(cfg.connect_retry_delay).await;
                }
            }
        }
    }

    Err(anyhow!(
        "database unreachable after {attempts} attempt(s): {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}
