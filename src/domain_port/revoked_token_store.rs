use super::StoreResult;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait RevokedTokenStore: Send + Sync {
    /// Insert-or-ignore.
    async fn revoke(&self, jti: &str, user_id: UserId, expires_at: DateTime<Utc>)
    -> StoreResult<()>;

    /// True iff an unexpired revocation row exists for `jti`.
    async fn is_revoked(&self, jti: &str) -> StoreResult<bool>;

    /// Deletes rows with `expires_at <= now`.
    async fn delete_expired(&self) -> StoreResult<u64>;
}

/// Per-user "revoked before" timestamps written by revoke-all.
#[async_trait::async_trait]
pub trait RevocationCutoffStore: Send + Sync {
    /// Upsert; an existing later cutoff is kept.
    async fn set_cutoff(&self, user_id: UserId, revoked_before: DateTime<Utc>)
    -> StoreResult<()>;

    async fn cutoff_for(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>>;
}
