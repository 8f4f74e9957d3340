use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

/// Shared secret guarding the administrative revoke endpoint. Comparison is
/// constant-time over a MAC of the presented value.
#[derive(Clone)]
pub struct AdminKey {
    mac: Hmac<Sha256>,
    expected: Vec<u8>,
}

impl AdminKey {
    pub fn new(key: &str) -> anyhow::Result<Self> {
        let mac = Hmac::<Sha256>::new_from_slice(b"tokenkeeper.admin-key")
            .map_err(|e| anyhow::anyhow!("admin key mac: {e}"))?;
        let mut tag = mac.clone();
        tag.update(key.as_bytes());
        let expected = tag.finalize().into_bytes().to_vec();
        Ok(Self { mac, expected })
    }

    pub fn verify(&self, presented: &str) -> bool {
        let mut mac = self.mac.clone();
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected).is_ok()
    }
}
