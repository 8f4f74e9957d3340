use crate::domain_model::*;
use crate::domain_port::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("username already taken")]
    UsernameTaken,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("invalid access token")]
    InvalidAccessToken,
    #[error("access token expired")]
    AccessTokenExpired,
    #[error("access token revoked")]
    AccessTokenRevoked,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err.root() {
            StoreError::CircuitOpen => AuthError::ServiceUnavailable,
            _ => AuthError::Store(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user_id: UserId,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken(pub String);

/// The raw refresh secret. Handed to the client once, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshToken(pub String);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

pub trait TokenCodec: Send + Sync {
    fn issue_access_token(
        &self,
        user: UserId,
        jti: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(AccessToken, DateTime<Utc>), AuthError>;

    /// Checks signature, issuer and audience, and expiry against `now`.
    fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAccess, AuthError>;
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
    /// Burns the same work as a real verification, for unknown users.
    async fn verify_dummy(&self, password: &str);
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn signup(&self, request: SignupInput) -> Result<UserId, AuthError>;
    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;
    async fn logout(&self, access: &VerifiedAccess, refresh_token: &str)
    -> Result<(), AuthError>;
    async fn verify_token(&self, token: &str) -> Result<VerifiedAccess, AuthError>;
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, AuthError>;
}
