use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Default)]
pub struct FakeUserRepo {
    by_username: DashMap<String, UserCredentials>,
}

impl FakeUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserRepo for FakeUserRepo {
    async fn create(&self, user_id: UserId, username: &str, password_hash: &str) -> StoreResult<()> {
        match self.by_username.entry(username.to_owned()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("username exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(UserCredentials {
                    user_id,
                    username: username.to_owned(),
                    password_hash: password_hash.to_owned(),
                });
                Ok(())
            }
        }
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserCredentials>> {
        Ok(self.by_username.get(username).map(|r| r.value().clone()))
    }
}
