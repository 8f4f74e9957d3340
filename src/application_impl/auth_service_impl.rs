use super::RefreshSecretHasher;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use crate::metrics::{Metric, MetricsRecorder};
use crate::resilience::Resilience;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence collaborators of the orchestrator.
#[derive(Clone)]
pub struct AuthStores {
    pub users: Arc<dyn UserRepo>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub revoked_tokens: Arc<dyn RevokedTokenStore>,
    pub cutoffs: Arc<dyn RevocationCutoffStore>,
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub refresh_ttl: Duration,
    pub max_refresh_tokens_per_user: u64,
    pub username_len: (usize, usize),
    pub password_len: (usize, usize),
    /// Reject access tokens issued at or before a user's revoke-all cutoff.
    pub enforce_revocation_cutoff: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::days(7),
            max_refresh_tokens_per_user: 5,
            username_len: (3, 32),
            password_len: (8, 128),
            enforce_revocation_cutoff: false,
        }
    }
}

enum Rotation {
    Rotated {
        user_id: UserId,
        raw: RefreshToken,
        record: RefreshTokenRecord,
    },
    Missing,
    Expired {
        user_id: UserId,
    },
}

pub struct RealAuthService {
    stores: AuthStores,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    refresh_secrets: RefreshSecretHasher,
    resilience: Resilience,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsRecorder>,
    policy: AuthPolicy,
}

impl RealAuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: AuthStores,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        refresh_secrets: RefreshSecretHasher,
        resilience: Resilience,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsRecorder>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            stores,
            credential_hasher,
            token_codec,
            refresh_secrets,
            resilience,
            clock,
            metrics,
            policy,
        }
    }

    fn validate_signup(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let (min_user, max_user) = self.policy.username_len;
        let user_len = username.chars().count();
        if user_len < min_user || user_len > max_user {
            return Err(AuthError::Validation(format!(
                "username must be {min_user}-{max_user} characters"
            )));
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(AuthError::Validation(
                "username may only contain letters, digits, '_', '-' and '.'".to_string(),
            ));
        }

        let (min_pw, max_pw) = self.policy.password_len;
        if password.len() < min_pw || password.len() > max_pw {
            return Err(AuthError::Validation(format!(
                "password must be {min_pw}-{max_pw} bytes"
            )));
        }
        Ok(())
    }

    #[inline]
    fn new_jti() -> String {
        Uuid::new_v4().to_string()
    }

    fn new_refresh_record(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> (RefreshToken, RefreshTokenRecord) {
        let raw = self.refresh_secrets.generate();
        let record = RefreshTokenRecord {
            id: RefreshTokenId::new_v4(),
            token_hash: self.refresh_secrets.hash(&raw),
            user_id,
            expires_at: now + self.policy.refresh_ttl,
            created_at: now,
        };
        (raw, record)
    }

    fn issue_tokens(
        &self,
        user_id: UserId,
        raw: RefreshToken,
        record: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<AuthTokens, AuthError> {
        let (access_token, access_exp) =
            self.token_codec
                .issue_access_token(user_id, &Self::new_jti(), now)?;
        Ok(AuthTokens {
            access_token,
            refresh_token: raw,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: record.expires_at,
        })
    }

    /// Evicts the user's oldest refresh tokens until there is room for one more.
    ///
    /// The cap holds per login, not atomically across logins: count, evict and
    /// the following `create` are separate statements, so concurrent logins for
    /// one user can briefly leave more than `max_refresh_tokens_per_user` rows.
    /// The next login trims the excess.
    async fn enforce_refresh_cap(&self, user_id: UserId) -> Result<(), AuthError> {
        let store = &self.stores.refresh_tokens;
        let cap = self.policy.max_refresh_tokens_per_user.max(1);

        let mut live = self
            .resilience
            .call("refresh.count_by_user", || store.count_by_user(user_id))
            .await?;

        while live >= cap {
            let removed = self
                .resilience
                .call("refresh.delete_oldest_by_user", || {
                    store.delete_oldest_by_user(user_id)
                })
                .await?;
            if !removed {
                break;
            }
            live -= 1;
            self.metrics.incr(Metric::RefreshEvicted);
            debug!(%user_id, "evicted oldest refresh token");
        }
        Ok(())
    }

    async fn rotate_once(&self, hash: &TokenHash) -> StoreResult<Rotation> {
        let now = self.clock.now();
        let mut tx = self.stores.refresh_tokens.begin_rotation().await?;

        let current = match tx.find_by_hash_for_update(hash).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                tx.rollback().await?;
                return Ok(Rotation::Missing);
            }
            Err(e) => return Err(e),
        };

        tx.delete_by_hash(hash).await?;

        if current.is_expired_at(now) {
            tx.commit().await?;
            return Ok(Rotation::Expired {
                user_id: current.user_id,
            });
        }

        let (raw, record) = self.new_refresh_record(current.user_id, now);
        tx.create(&record).await?;
        tx.commit().await?;

        Ok(Rotation::Rotated {
            user_id: current.user_id,
            raw,
            record,
        })
    }

    async fn check_cutoff(&self, access: &VerifiedAccess) -> Result<(), AuthError> {
        let cutoffs = &self.stores.cutoffs;
        let cutoff = self
            .resilience
            .call("cutoff.cutoff_for", || cutoffs.cutoff_for(access.user_id))
            .await?;
        match cutoff {
            // `iat` has second resolution
            Some(cutoff) if access.issued_at.timestamp() <= cutoff.timestamp() => {
                Err(AuthError::AccessTokenRevoked)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn signup(&self, request: SignupInput) -> Result<UserId, AuthError> {
        let SignupInput { username, password } = request;

        self.validate_signup(&username, &password)?;

        let password_hash = self.credential_hasher.hash_password(&password).await?;
        let user_id = UserId::new_v4();
        let users = &self.stores.users;

        match self
            .resilience
            .call("user.create", || {
                users.create(user_id, &username, &password_hash)
            })
            .await
        {
            Ok(()) => {
                info!(%user_id, "user registered");
                self.metrics.incr(Metric::Registered);
                Ok(user_id)
            }
            Err(e) if matches!(e.root(), StoreError::Conflict(_)) => Err(AuthError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError> {
        let LoginInput { username, password } = request;
        let users = &self.stores.users;

        let found = self
            .resilience
            .call("user.find_by_username", || users.find_by_username(&username))
            .await?;

        let Some(creds) = found else {
            self.credential_hasher.verify_dummy(&password).await;
            self.metrics.incr(Metric::LoginFailed);
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .credential_hasher
            .verify_password(&password, &creds.password_hash)
            .await?;
        if !ok {
            self.metrics.incr(Metric::LoginFailed);
            return Err(AuthError::InvalidCredentials);
        }

        let user_id = creds.user_id;
        self.enforce_refresh_cap(user_id).await?;

        let now = self.clock.now();
        let (raw, record) = self.new_refresh_record(user_id, now);
        let store = &self.stores.refresh_tokens;
        self.resilience
            .call("refresh.create", || store.create(&record))
            .await?;

        let tokens = self.issue_tokens(user_id, raw, &record, now)?;
        info!(%user_id, "login succeeded");
        self.metrics.incr(Metric::LoginSucceeded);

        Ok(LoginResult { user_id, tokens })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let hash = self.refresh_secrets.hash_presented(refresh_token)?;

        let rotation = self
            .resilience
            .call("refresh.rotate", || self.rotate_once(&hash))
            .await?;

        match rotation {
            Rotation::Rotated {
                user_id,
                raw,
                record,
            } => {
                let tokens = self.issue_tokens(user_id, raw, &record, record.created_at)?;
                debug!(%user_id, "refresh token rotated");
                self.metrics.incr(Metric::RefreshRotated);
                Ok(tokens)
            }
            Rotation::Missing => {
                warn!(token = %hash, "unknown or already rotated refresh token presented");
                self.metrics.incr(Metric::RefreshReplayRejected);
                Err(AuthError::InvalidRefreshToken)
            }
            Rotation::Expired { user_id } => {
                debug!(%user_id, "expired refresh token presented");
                self.metrics.incr(Metric::RefreshExpired);
                Err(AuthError::RefreshTokenExpired)
            }
        }
    }

    async fn logout(&self, access: &VerifiedAccess, refresh_token: &str) -> Result<(), AuthError> {
        let revoked = &self.stores.revoked_tokens;
        let revoke = self
            .resilience
            .call("revoked.revoke", || {
                revoked.revoke(&access.jti, access.user_id, access.expires_at)
            })
            .await;
        if let Err(e) = &revoke {
            warn!(user_id = %access.user_id, error = %e, "logout: access token not revoked");
        }

        // A malformed refresh token cannot exist in the store; nothing to delete.
        let delete = match self.refresh_secrets.hash_presented(refresh_token) {
            Ok(hash) => {
                let store = &self.stores.refresh_tokens;
                let r = self
                    .resilience
                    .call("refresh.delete_by_hash", || store.delete_by_hash(&hash))
                    .await;
                if let Err(e) = &r {
                    warn!(user_id = %access.user_id, error = %e, "logout: refresh token not deleted");
                }
                r
            }
            Err(_) => Ok(()),
        };

        revoke?;
        delete?;
        info!(user_id = %access.user_id, "logout completed");
        self.metrics.incr(Metric::LogoutCompleted);
        Ok(())
    }

    async fn verify_token(&self, token: &str) -> Result<VerifiedAccess, AuthError> {
        let access = self
            .token_codec
            .verify_access_token(token, self.clock.now())?;

        let revoked_store = &self.stores.revoked_tokens;
        let revoked = self
            .resilience
            .call("revoked.is_revoked", || revoked_store.is_revoked(&access.jti))
            .await
            .map_err(|e| {
                warn!(jti = %access.jti, error = %e, "revocation check failed, rejecting token");
                AuthError::from(e)
            })?;
        if revoked {
            self.metrics.incr(Metric::AccessRejected);
            return Err(AuthError::AccessTokenRevoked);
        }

        if self.policy.enforce_revocation_cutoff {
            if let Err(e) = self.check_cutoff(&access).await {
                self.metrics.incr(Metric::AccessRejected);
                return Err(e);
            }
        }

        Ok(access)
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, AuthError> {
        let store = &self.stores.refresh_tokens;
        let deleted = self
            .resilience
            .call("refresh.delete_all_by_user", || store.delete_all_by_user(user_id))
            .await?;

        if self.policy.enforce_revocation_cutoff {
            let now = self.clock.now();
            let cutoffs = &self.stores.cutoffs;
            self.resilience
                .call("cutoff.set_cutoff", || cutoffs.set_cutoff(user_id, now))
                .await?;
        }

        info!(%user_id, deleted, "revoked all tokens for user");
        self.metrics.incr(Metric::UserTokensRevoked);
        Ok(deleted)
    }
}
