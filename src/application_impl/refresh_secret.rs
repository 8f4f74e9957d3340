use crate::application_port::{AuthError, RefreshToken};
use crate::domain_model::TokenHash;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

const SECRET_BYTES: usize = 32;

/// Generates raw refresh secrets and derives the keyed hash under which they
/// are stored.
#[derive(Clone)]
pub struct RefreshSecretHasher {
    mac: Hmac<Sha256>,
}

impl RefreshSecretHasher {
    pub fn new(pepper: &[u8]) -> Result<Self, AuthError> {
        let mac = Hmac::<Sha256>::new_from_slice(pepper)
            .map_err(|e| AuthError::InternalError(format!("refresh pepper: {e}")))?;
        Ok(Self { mac })
    }

    pub fn generate(&self) -> RefreshToken {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        RefreshToken(hex::encode(bytes))
    }

    pub fn hash(&self, raw: &RefreshToken) -> TokenHash {
        let mut mac = self.mac.clone();
        mac.update(raw.0.as_bytes());
        TokenHash(hex::encode(mac.finalize().into_bytes()))
    }

    /// Hashes a secret presented by a client. Anything that could not have
    /// come from [`generate`](Self::generate) is rejected without a lookup.
    pub fn hash_presented(&self, raw: &str) -> Result<TokenHash, AuthError> {
        let well_formed = raw.len() == SECRET_BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(AuthError::InvalidRefreshToken);
        }
        Ok(self.hash(&RefreshToken(raw.to_owned())))
    }
}
