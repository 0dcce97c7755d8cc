//! Encryption port (driven/secondary port)
//!
//! Optional collaborator used when `encryption.enabled` is set. The engine
//! encrypts a staging copy before upload and decrypts downloads in place;
//! the cipher itself belongs to the adapter.
//!
//! ## Design Notes
//!
//! - Implementations must use a fresh nonce per call, so encrypting the same
//!   input twice yields different output, and `decrypt(encrypt(x)) == x`
//!   must hold under the same key.

use std::fmt;

/// Symmetric key material
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED; {}])", self.0.len())
    }
}

/// Content encryption
#[async_trait::async_trait]
pub trait IEncryption: Send + Sync {
    /// Encrypt `plaintext` with a fresh nonce
    async fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> anyhow::Result<Vec<u8>>;

    /// Decrypt data produced by [`IEncryption::encrypt`] under the same key
    async fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey) -> anyhow::Result<Vec<u8>>;
}
