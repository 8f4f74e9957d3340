use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

pub struct FakeRevokedTokenStore {
    rows: DashMap<String, RevokedTokenRecord>,
    clock: Arc<dyn Clock>,
}

impl FakeRevokedTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait::async_trait]
impl RevokedTokenStore for FakeRevokedTokenStore {
    async fn revoke(
        &self,
        jti: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let revoked_at = self.clock.now();
        self.rows
            .entry(jti.to_owned())
            .or_insert_with(|| RevokedTokenRecord {
                jti: jti.to_owned(),
                user_id,
                expires_at,
                revoked_at,
            });
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .rows
            .get(jti)
            .map(|r| r.expires_at > now)
            .unwrap_or(false))
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut removed = 0u64;
        self.rows.retain(|_, r| {
            let keep = r.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

pub struct FakeRevocationCutoffStore {
    cutoffs: DashMap<UserId, DateTime<Utc>>,
}

impl FakeRevocationCutoffStore {
    pub fn new() -> Self {
        Self {
            cutoffs: DashMap::new(),
        }
    }
}

impl Default for FakeRevocationCutoffStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RevocationCutoffStore for FakeRevocationCutoffStore {
    async fn set_cutoff(&self, user_id: UserId, revoked_before: DateTime<Utc>) -> StoreResult<()> {
        self.cutoffs
            .entry(user_id)
            .and_modify(|at| {
                if revoked_before > *at {
                    *at = revoked_before;
                }
            })
            .or_insert(revoked_before);
        Ok(())
    }

    async fn cutoff_for(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.cutoffs.get(&user_id).map(|at| *at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn revocation_holds_until_expiry_then_is_purged() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = FakeRevokedTokenStore::new(clock.clone());
        let user = UserId::new_v4();
        let exp = clock.now() + Duration::minutes(15);

        store.revoke("jti-1", user, exp).await.unwrap();
        store.revoke("jti-1", user, exp).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("jti-1").await.unwrap());
        assert!(!store.is_revoked("jti-2").await.unwrap());

        clock.advance(Duration::minutes(15));
        assert!(!store.is_revoked("jti-1").await.unwrap());
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.delete_expired().await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cutoff_only_moves_forward() {
        let store = FakeRevocationCutoffStore::new();
        let user = UserId::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        store.set_cutoff(user, t0).await.unwrap();
        store.set_cutoff(user, t0 - Duration::hours(1)).await.unwrap();
        assert_eq!(store.cutoff_for(user).await.unwrap(), Some(t0));
        assert_eq!(store.cutoff_for(UserId::new_v4()).await.unwrap(), None);
    }
}
