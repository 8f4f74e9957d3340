use crate::application_port::{AccessToken, AuthError, TokenCodec};
use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

pub const MIN_SIGNING_KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub signing_key: Vec<u8>,
}

pub struct JwtHs256Codec {
    issuer: String,
    audience: String,
    access_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig) -> Result<Self, AuthError> {
        if cfg.signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(AuthError::InternalError(format!(
                "JWT signing key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        if cfg.access_ttl <= Duration::zero() {
            return Err(AuthError::InternalError("access token TTL must be positive".into()));
        }

        // Expiry is checked against the injected clock in `verify_access_token`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_audience(&[cfg.audience.clone()]);
        validation.set_issuer(&[cfg.issuer.clone()]);

        Ok(JwtHs256Codec {
            encoding_key: EncodingKey::from_secret(&cfg.signing_key),
            decoding_key: DecodingKey::from_secret(&cfg.signing_key),
            issuer: cfg.issuer,
            audience: cfg.audience,
            access_ttl: cfg.access_ttl,
            validation,
        })
    }

    #[inline]
    fn parse_user_id(sub: &str) -> Result<UserId, AuthError> {
        sub.parse::<UserId>().map_err(|_| AuthError::InvalidAccessToken)
    }

    #[inline]
    fn from_timestamp(secs: i64) -> Result<DateTime<Utc>, AuthError> {
        DateTime::<Utc>::from_timestamp(secs, 0).ok_or(AuthError::InvalidAccessToken)
    }
}

impl TokenCodec for JwtHs256Codec {
    fn issue_access_token(
        &self,
        user: UserId,
        jti: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(AccessToken, DateTime<Utc>), AuthError> {
        let iat = issued_at.timestamp();
        let exp = (issued_at + self.access_ttl).timestamp();
        let claims = AccessClaims {
            sub: user.to_string(),
            jti: jti.to_owned(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok((AccessToken(token), Self::from_timestamp(exp)?))
    }

    fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAccess, AuthError> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidAccessToken)?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::AccessTokenExpired);
        }
        if claims.jti.is_empty() {
            return Err(AuthError::InvalidAccessToken);
        }

        Ok(VerifiedAccess {
            user_id: Self::parse_user_id(&claims.sub)?,
            issued_at: Self::from_timestamp(claims.iat)?,
            expires_at: Self::from_timestamp(claims.exp)?,
            jti: claims.jti,
        })
    }
}
