//! Decryption of stored connection credentials
//!
//! Payloads are `base64(nonce || ciphertext)` sealed with AES-256-GCM.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Decrypt-by-key API over stored credential payloads
pub trait CredentialCipher: Send + Sync {
    /// Decrypt one payload into its plaintext (a JSON document)
    fn decrypt(&self, payload: &str) -> Result<SecretString>;
}

/// AES-256-GCM cipher keyed from configuration
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build from a base64-encoded 32-byte key
    pub fn from_base64_key(key: &SecretString) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|_| Error::Config("Credential encryption key is not valid base64".into()))?;
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| Error::Config("Credential encryption key must be 32 bytes".into()))?;
        Ok(AesGcmCipher { cipher })
    }

    /// Seal a plaintext payload with a fresh nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Credential("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }
}

impl CredentialCipher for AesGcmCipher {
    fn decrypt(&self, payload: &str) -> Result<SecretString> {
        let sealed = STANDARD
            .decode(payload.trim())
            .map_err(|_| Error::Credential("payload is not valid base64".into()))?;
        if sealed.len() <= NONCE_SIZE {
            return Err(Error::Credential("payload is too short".into()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Credential("decryption failed".into()))?;

        let text = String::from_utf8(plaintext)
            .map_err(|_| Error::Credential("plaintext is not UTF-8".into()))?;
        Ok(SecretString::from(text))
    }
}

#[cfg(test)]
pub(crate) fn test_key() -> SecretString {
    SecretString::from(STANDARD.encode([7u8; 32]))
}
