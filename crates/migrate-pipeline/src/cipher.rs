//! AES-256-GCM field cipher for the `encrypt` transform.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use migrate_core::FieldCipher;
use thiserror::Error;

const TAG_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherKeyError {
    #[error("encryption key must be 32 bytes or 64 hex characters, got {0} bytes")]
    InvalidLength(usize),
}

/// Produces `iv_hex:tag_hex:cipher_hex` with a fresh 96-bit IV per value.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Accepts the key as 32 raw bytes or as 64 hex characters.
    pub fn from_key_material(material: &str) -> Result<Self, CipherKeyError> {
        let key = if material.len() == 64 {
            hex::decode(material).unwrap_or_else(|_| material.as_bytes().to_vec())
        } else {
            material.as_bytes().to_vec()
        };

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CipherKeyError::InvalidLength(key.len()))?;
        Ok(Self { cipher })
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher(..)")
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| format!("encryption failed: {e}"))?;

        // aes-gcm appends the tag to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }
}
