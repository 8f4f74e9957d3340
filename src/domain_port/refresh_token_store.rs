use super::{RotationTx, StoreResult};
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Fails with `Conflict` when the hash already exists.
    async fn create(&self, token: &RefreshTokenRecord) -> StoreResult<()>;

    async fn find_by_hash(&self, hash: &TokenHash) -> StoreResult<RefreshTokenRecord>;

    /// Idempotent.
    async fn delete_by_hash(&self, hash: &TokenHash) -> StoreResult<()>;

    async fn count_by_user(&self, user_id: UserId) -> StoreResult<u64>;

    /// Removes the oldest-created row of the user, if any. Returns whether a
    /// row was removed.
    async fn delete_oldest_by_user(&self, user_id: UserId) -> StoreResult<bool>;

    async fn delete_all_by_user(&self, user_id: UserId) -> StoreResult<u64>;

    /// Deletes rows with `expires_at <= now`.
    async fn delete_expired(&self) -> StoreResult<u64>;

    async fn begin_rotation<'t>(&'t self) -> StoreResult<Box<dyn RotationTx<'t> + 't>>;
}
