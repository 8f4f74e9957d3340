use super::StoreResult;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `Conflict` when the username is taken.
    async fn create(&self, user_id: UserId, username: &str, password_hash: &str)
    -> StoreResult<()>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserCredentials>>;
}
