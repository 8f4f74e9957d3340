use crate::domain_model::*;
use crate::domain_port::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
struct Table {
    // hash -> (insertion sequence, row)
    rows: HashMap<String, (u64, RefreshTokenRecord)>,
    next_seq: u64,
}

impl Table {
    fn insert(&mut self, token: &RefreshTokenRecord) -> StoreResult<()> {
        if self.rows.contains_key(&token.token_hash.0) {
            return Err(StoreError::Conflict("duplicate token_hash".into()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows
            .insert(token.token_hash.0.clone(), (seq, token.clone()));
        Ok(())
    }
}

/// In-memory refresh-token table. One async mutex guards the whole table; a
/// rotation transaction holds it from `begin_rotation` until commit or drop,
/// which is a coarser version of the row lock the MySQL store takes.
pub struct FakeRefreshTokenStore {
    table: Arc<Mutex<Table>>,
    clock: Arc<dyn Clock>,
}

impl FakeRefreshTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn rows_for_user(&self, user_id: UserId) -> Vec<RefreshTokenRecord> {
        let table = self.table.lock().await;
        let mut rows: Vec<_> = table
            .rows
            .values()
            .filter(|(_, r)| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|(seq, r)| (r.created_at, *seq));
        rows.into_iter().map(|(_, r)| r).collect()
    }
}

#[async_trait::async_trait]
impl RefreshTokenStore for FakeRefreshTokenStore {
    async fn create(&self, token: &RefreshTokenRecord) -> StoreResult<()> {
        self.table.lock().await.insert(token)
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> StoreResult<RefreshTokenRecord> {
        self.table
            .lock()
            .await
            .rows
            .get(&hash.0)
            .map(|(_, r)| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> StoreResult<()> {
        self.table.lock().await.rows.remove(&hash.0);
        Ok(())
    }

    async fn count_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .values()
            .filter(|(_, r)| r.user_id == user_id)
            .count() as u64)
    }

    async fn delete_oldest_by_user(&self, user_id: UserId) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        let oldest = table
            .rows
            .iter()
            .filter(|(_, (_, r))| r.user_id == user_id)
            .min_by_key(|(_, (seq, r))| (r.created_at, *seq))
            .map(|(hash, _)| hash.clone());
        Ok(match oldest {
            Some(hash) => table.rows.remove(&hash).is_some(),
            None => false,
        })
    }

    async fn delete_all_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|_, (_, r)| r.user_id != user_id);
        Ok((before - table.rows.len()) as u64)
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|_, (_, r)| !r.is_expired_at(now));
        Ok((before - table.rows.len()) as u64)
    }

    async fn begin_rotation<'t>(&'t self) -> StoreResult<Box<dyn RotationTx<'t> + 't>> {
        let guard = self.table.clone().lock_owned().await;
        Ok(Box::new(FakeRotationTx {
            guard,
            deleted: Vec::new(),
            created: Vec::new(),
        }))
    }
}

/// Changes are buffered and applied on commit; dropping discards them.
struct FakeRotationTx {
    guard: OwnedMutexGuard<Table>,
    deleted: Vec<String>,
    created: Vec<RefreshTokenRecord>,
}

#[async_trait::async_trait]
impl<'t> RotationTx<'t> for FakeRotationTx {
    async fn find_by_hash_for_update(
        &mut self,
        hash: &TokenHash,
    ) -> StoreResult<RefreshTokenRecord> {
        if self.deleted.contains(&hash.0) {
            return Err(StoreError::NotFound);
        }
        if let Some(r) = self.created.iter().find(|r| r.token_hash == *hash) {
            return Ok(r.clone());
        }
        self.guard
            .rows
            .get(&hash.0)
            .map(|(_, r)| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_by_hash(&mut self, hash: &TokenHash) -> StoreResult<()> {
        self.created.retain(|r| r.token_hash != *hash);
        self.deleted.push(hash.0.clone());
        Ok(())
    }

    async fn create(&mut self, token: &RefreshTokenRecord) -> StoreResult<()> {
        let exists_in_table =
            self.guard.rows.contains_key(&token.token_hash.0) && !self.deleted.contains(&token.token_hash.0);
        if exists_in_table || self.created.iter().any(|r| r.token_hash == token.token_hash) {
            return Err(StoreError::Conflict("duplicate token_hash".into()));
        }
        self.created.push(token.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let FakeRotationTx {
            mut guard,
            deleted,
            created,
        } = *self;
        for hash in &deleted {
            guard.rows.remove(hash);
        }
        for token in &created {
            guard.insert(token)?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()))
    }

    fn record(user: UserId, hash: &str, created: chrono::DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: RefreshTokenId::new_v4(),
            token_hash: TokenHash(hash.into()),
            user_id: user,
            expires_at: created + Duration::days(7),
            created_at: created,
        }
    }

    #[tokio::test]
    async fn duplicate_hash_conflicts() {
        let c = clock();
        let store = FakeRefreshTokenStore::new(c.clone());
        let user = UserId::new_v4();
        store.create(&record(user, "h1", c.now())).await.unwrap();
        let err = store.create(&record(user, "h1", c.now())).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_find_reports_not_found() {
        let c = clock();
        let store = FakeRefreshTokenStore::new(c.clone());
        let hash = TokenHash("h1".into());
        store.delete_by_hash(&hash).await.unwrap();
        assert!(store.find_by_hash(&hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn oldest_is_evicted_first() {
        let c = clock();
        let store = FakeRefreshTokenStore::new(c.clone());
        let user = UserId::new_v4();
        store.create(&record(user, "b", c.now() + Duration::seconds(1))).await.unwrap();
        store.create(&record(user, "a", c.now())).await.unwrap();

        assert!(store.delete_oldest_by_user(user).await.unwrap());
        assert!(store.find_by_hash(&TokenHash("a".into())).await.is_err());
        assert!(store.find_by_hash(&TokenHash("b".into())).await.is_ok());
        assert_eq!(store.count_by_user(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dropped_rotation_changes_nothing() {
        let c = clock();
        let store = FakeRefreshTokenStore::new(c.clone());
        let user = UserId::new_v4();
        store.create(&record(user, "h1", c.now())).await.unwrap();
        {
            let mut tx = store.begin_rotation().await.unwrap();
            tx.delete_by_hash(&TokenHash("h1".into())).await.unwrap();
            tx.create(&record(user, "h2", c.now())).await.unwrap();
        }
        assert!(store.find_by_hash(&TokenHash("h1".into())).await.is_ok());
        assert!(store.find_by_hash(&TokenHash("h2".into())).await.is_err());
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive() {
        let c = clock();
        let store = FakeRefreshTokenStore::new(c.clone());
        let user = UserId::new_v4();
        let mut at_boundary = record(user, "edge", c.now());
        at_boundary.expires_at = c.now() + Duration::hours(1);
        store.create(&at_boundary).await.unwrap();
        store.create(&record(user, "live", c.now())).await.unwrap();

        c.advance(Duration::hours(1));
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.delete_expired().await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }
}
