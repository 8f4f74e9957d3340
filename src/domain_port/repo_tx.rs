use super::StoreResult;
use crate::domain_model::*;

/// A scoped transaction used only for refresh-token rotation.
///
/// `find_by_hash_for_update` takes an exclusive lock on the row that is held
/// until `commit` or `rollback`. Dropping the transaction without committing
/// rolls it back.
#[async_trait::async_trait]
pub trait RotationTx<'t>: Send {
    async fn find_by_hash_for_update(&mut self, hash: &TokenHash)
    -> StoreResult<RefreshTokenRecord>;
    async fn delete_by_hash(&mut self, hash: &TokenHash) -> StoreResult<()>;
    async fn create(&mut self, token: &RefreshTokenRecord) -> StoreResult<()>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
