use super::util::classify;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlConnection, MySqlPool, Row, Transaction};
use std::sync::Arc;

pub(crate) const DELETE_BATCH: u64 = 5_000;

const SELECT_COLUMNS: &str = "id, token_hash, user_id, expires_at, created_at";

pub struct MySqlRefreshTokenStore {
    pool: MySqlPool,
    clock: Arc<dyn Clock>,
}

impl MySqlRefreshTokenStore {
    pub fn new(pool: MySqlPool, clock: Arc<dyn Clock>) -> Self {
        MySqlRefreshTokenStore { pool, clock }
    }

    fn row_to_record(row: &MySqlRow) -> StoreResult<RefreshTokenRecord> {
        Ok(RefreshTokenRecord {
            id: row.try_get::<RefreshTokenId, _>("id").map_err(classify)?,
            token_hash: TokenHash(row.try_get::<String, _>("token_hash").map_err(classify)?),
            user_id: row.try_get::<UserId, _>("user_id").map_err(classify)?,
            expires_at: row
                .try_get::<DateTime<Utc>, _>("expires_at")
                .map_err(classify)?,
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .map_err(classify)?,
        })
    }
}

async fn insert(conn: &mut MySqlConnection, token: &RefreshTokenRecord) -> StoreResult<()> {
    sqlx::query(
        r#"
INSERT INTO refresh_tokens (id, token_hash, user_id, expires_at, created_at)
VALUES (?, ?, ?, ?, ?)
"#,
    )
    .bind(token.id)
    .bind(&token.token_hash.0)
    .bind(token.user_id)
    .bind(token.expires_at)
    .bind(token.created_at)
    .execute(conn)
    .await
    .map_err(classify)?;
    Ok(())
}

async fn delete_hash(conn: &mut MySqlConnection, hash: &TokenHash) -> StoreResult<()> {
    sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = ?")
        .bind(&hash.0)
        .execute(conn)
        .await
        .map_err(classify)?;
    Ok(())
}

#[async_trait::async_trait]
impl RefreshTokenStore for MySqlRefreshTokenStore {
    async fn create(&self, token: &RefreshTokenRecord) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        insert(&mut conn, token).await
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> StoreResult<RefreshTokenRecord> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token_hash = ?"
        ))
        .bind(&hash.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(StoreError::NotFound)?;

        Self::row_to_record(&row)
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        delete_hash(&mut conn, hash).await
    }

    async fn count_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_oldest_by_user(&self, user_id: UserId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
DELETE FROM refresh_tokens
WHERE user_id = ?
ORDER BY created_at ASC, seq ASC
LIMIT 1
"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    // Batched so a large backlog does not hold locks on the whole range.
    async fn delete_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut total = 0;
        loop {
            let deleted = sqlx::query(
                "DELETE FROM refresh_tokens WHERE expires_at <= ? ORDER BY expires_at LIMIT ?",
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

    async fn begin_rotation<'t>(&'t self) -> StoreResult<Box<dyn RotationTx<'t> + 't>> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(MySqlRotationTx { inner: tx }))
    }
}

/// InnoDB transaction; `SELECT … FOR UPDATE` holds the row lock until the
/// transaction ends. A concurrent rotation of the same hash blocks on the
/// lock and then reads the committed state, in which the row is gone.
pub struct MySqlRotationTx {
    inner: Transaction<'static, MySql>,
}

#[async_trait::async_trait]
impl<'t> RotationTx<'t> for MySqlRotationTx {
    async fn find_by_hash_for_update(
        &mut self,
        hash: &TokenHash,
    ) -> StoreResult<RefreshTokenRecord> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token_hash = ? FOR UPDATE"
        ))
        .bind(&hash.0)
        .fetch_optional(&mut *self.inner)
        .await
        .map_err(classify)?
        .ok_or(StoreError::NotFound)?;

        MySqlRefreshTokenStore::row_to_record(&row)
    }

    async fn delete_by_hash(&mut self, hash: &TokenHash) -> StoreResult<()> {
        delete_hash(&mut *self.inner, hash).await
    }

    async fn create(&mut self, token: &RefreshTokenRecord) -> StoreResult<()> {
        insert(&mut *self.inner, token).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await.map_err(classify)
    }
}
