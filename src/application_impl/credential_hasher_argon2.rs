use crate::application_port::{AuthError, CredentialHasher};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

const DUMMY_PASSWORD: &str = "timing-equalizer-not-a-real-password";

/// Argon2id. Hashing and verification run on the blocking pool.
pub struct Argon2PasswordHasher {
    params: Params,
    dummy_hash: String,
}

impl Argon2PasswordHasher {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_params(Params::default())
    }

    /// `memory_kib`, `iterations` and `parallelism` as in RFC 9106.
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AuthError::InternalError(format!("argon2 params: {e}")))?;
        Self::with_params(params)
    }

    fn with_params(params: Params) -> Result<Self, AuthError> {
        let dummy_hash = hash_blocking(&params, DUMMY_PASSWORD)?;
        Ok(Self { params, dummy_hash })
    }
}

fn argon2(params: &Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
}

fn hash_blocking(params: &Params, password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2(params)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::InternalError(e.to_string()))?
        .to_string();
    Ok(hash)
}

// Parameters are read from the PHC string, so hashes made under older
// settings keep verifying.
fn verify_blocking(params: &Params, password: &str, password_hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| AuthError::InternalError(format!("invalid PHC hash: {e}")))?;

    match argon2(params).verify_password(password.as_bytes(), &parsed) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::InternalError(format!("verify error: {e}"))),
    }
}

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let params = self.params.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_blocking(&params, &password))
            .await
            .map_err(|e| AuthError::InternalError(format!("hash task: {e}")))?
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let params = self.params.clone();
        let password = password.to_owned();
        let password_hash = password_hash.to_owned();
        tokio::task::spawn_blocking(move || verify_blocking(&params, &password, &password_hash))
            .await
            .map_err(|e| AuthError::InternalError(format!("verify task: {e}")))?
    }

    async fn verify_dummy(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy_hash).await;
    }
}
