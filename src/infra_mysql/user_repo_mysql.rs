use super::util::{classify, is_dup_key};
use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::{MySqlPool, Row};

pub struct MySqlUserRepo {
    pool: MySqlPool,
}
impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserRepo { pool }
    }
}

#[async_trait::async_trait]
impl UserRepo for MySqlUserRepo {
    async fn create(
        &self,
        user_id: UserId,
        username: &str,
        password_hash: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO users (user_id, username, password_hash, is_active)
VALUES (?, ?, ?, ?)
"#,
        )
        .bind(user_id)
        .bind(username)
        .bind(password_hash)
        .bind(true)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                StoreError::Conflict(format!("username {username} is taken"))
            } else {
                classify(e)
            }
        })?;

        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserCredentials>> {
        let Some(row) = sqlx::query(
            "SELECT user_id, username, password_hash FROM users WHERE username = ? AND is_active = 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        else {
            return Ok(None);
        };

        Ok(Some(UserCredentials {
            user_id: row.try_get::<UserId, _>("user_id").map_err(classify)?,
            username: row.try_get::<String, _>("username").map_err(classify)?,
            password_hash: row.try_get::<String, _>("password_hash").map_err(classify)?,
        }))
    }
}
