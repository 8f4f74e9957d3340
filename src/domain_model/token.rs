use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct RefreshTokenId(pub uuid::Uuid);

impl RefreshTokenId {
    pub fn new_v4() -> Self {
        RefreshTokenId(uuid::Uuid::new_v4())
    }
}

/// Hex-encoded keyed hash of a raw refresh secret. The raw secret itself is
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(pub String);

impl fmt::Display for TokenHash {
    // Only a short prefix, enough to correlate log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(8);
        write!(f, "{}…", &self.0[..end])
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: RefreshTokenId,
    pub token_hash: TokenHash,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Expiry is inclusive: a row whose `expires_at` equals `now` is expired.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct RevokedTokenRecord {
    pub jti: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// An access token whose signature, issuer, audience and expiry were checked.
#[derive(Debug, Clone)]
pub struct VerifiedAccess {
    pub user_id: UserId,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
