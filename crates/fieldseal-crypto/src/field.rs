//! AES-256-GCM encryption for persisted field values.
//!
//! Wire format v1: [1 byte: version=1][12 bytes: IV][N bytes: ciphertext + tag],
//! base64url-encoded so ciphertext can live in plain TEXT columns.
//! The key is a domain DEK; DEK wrapping is handled separately.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::CryptoError;
use crate::types::{
    AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CURRENT_VERSION, SUPPORTED_VERSIONS,
};

/// Generate a random 12-byte IV for AES-GCM.
fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// AES-256-GCM cipher over one domain's DEK.
///
/// String in, string out: plaintext UTF-8 is encrypted to the v1 wire
/// format and returned base64url-encoded.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Create a cipher from 32 bytes of raw DEK material.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != AES_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: AES_KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a field value. Returns the base64url-encoded v1 blob.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        let iv = generate_iv()?;
        let nonce = Nonce::from_slice(&iv);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut blob = Vec::with_capacity(1 + iv.len() + ciphertext.len());
        blob.push(CURRENT_VERSION);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(base64url_encode(&blob))
    }

    /// Decrypt a base64url-encoded v1 blob back to the field value.
    ///
    /// Fails on values that do not decode to the wire format (a strong
    /// signal the stored value was never encrypted), on a wrong key, and
    /// on tampering (GCM tag mismatch).
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        let blob = base64url_decode(encoded)?;

        let min_length = 1 + AES_GCM_IV_LENGTH + AES_GCM_TAG_LENGTH;
        if blob.len() < min_length {
            return Err(CryptoError::DataTooShort);
        }

        let version = blob[0];
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let iv = &blob[1..1 + AES_GCM_IV_LENGTH];
        let ciphertext = &blob[1 + AES_GCM_IV_LENGTH..];
        let nonce = Nonce::from_slice(iv);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}
