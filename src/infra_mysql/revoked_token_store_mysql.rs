use super::refresh_token_store_mysql::DELETE_BATCH;
use super::util::classify;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use std::sync::Arc;

pub struct MySqlRevokedTokenStore {
    pool: MySqlPool,
    clock: Arc<dyn Clock>,
}

impl MySqlRevokedTokenStore {
    pub fn new(pool: MySqlPool, clock: Arc<dyn Clock>) -> Self {
        MySqlRevokedTokenStore { pool, clock }
    }
}

#[async_trait::async_trait]
impl RevokedTokenStore for MySqlRevokedTokenStore {
    async fn revoke(
        &self,
        jti: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO revoked_tokens (jti, user_id, expires_at, revoked_at)
VALUES (?, ?, ?, ?)
ON DUPLICATE KEY UPDATE jti = jti
"#,
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM revoked_tokens WHERE jti = ? AND expires_at > ?",
        )
        .bind(jti)
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(count > 0)
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut total = 0;
        loop {
            let deleted = sqlx::query(
                "DELETE FROM revoked_tokens WHERE expires_at <= ? ORDER BY expires_at LIMIT ?",
            )
            .bind(now)
            .bind(DELETE_BATCH)
            .execute(&self.pool)
            .await
            .map_err(classify)?
            .rows_affected();
            total += deleted;
            if deleted < DELETE_BATCH {
                return Ok(total);
            }
        }
    }
}

pub struct MySqlRevocationCutoffStore {
    pool: MySqlPool,
}

impl MySqlRevocationCutoffStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlRevocationCutoffStore { pool }
    }
}

#[async_trait::async_trait]
impl RevocationCutoffStore for MySqlRevocationCutoffStore {
    async fn set_cutoff(
        &self,
        user_id: UserId,
        revoked_before: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO user_revocation_cutoffs (user_id, revoked_before)
VALUES (?, ?)
ON DUPLICATE KEY UPDATE revoked_before = GREATEST(revoked_before, VALUES(revoked_before))
"#,
        )
        .bind(user_id)
        .bind(revoked_before)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn cutoff_for(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT revoked_before FROM user_revocation_cutoffs WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }
}
