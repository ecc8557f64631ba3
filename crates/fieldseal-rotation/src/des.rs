//! Data Encryption Service: encrypt/decrypt one field value for a domain.
//!
//! Deliberately fail-open: encryption protects confidentiality, not
//! integrity-critical correctness, so reads and writes are never blocked
//! by missing metadata or a bad cipher state. Every passthrough is
//! logged, loudly where it signals misconfiguration or corruption.

use std::sync::Arc;

use fieldseal_crypto::FieldCipher;
use fieldseal_store::FieldCodec;
use tracing::{debug, error, info, warn};

use crate::cache::DomainKeyCache;

/// Field-level encrypt/decrypt over the unwrapped-DEK cache.
///
/// Never talks to the key encryption service; the rotation service hands
/// it DEKs already in usable form through the cache.
pub struct DataEncryptionService {
    enabled: bool,
    keys: Arc<DomainKeyCache>,
}

impl DataEncryptionService {
    pub fn new(enabled: bool, keys: Arc<DomainKeyCache>) -> Self {
        Self { enabled, keys }
    }

    /// Encrypt a field value under the domain's current DEK.
    ///
    /// Always the current key, never the previous one: data is encrypted
    /// under whichever key is current at write time. Returns the value
    /// unchanged when encryption is disabled, the value is empty, the
    /// domain is unknown, it has no current key, or the cipher fails.
    pub fn encrypt(&self, value: &str, domain_id: &str) -> String {
        if !self.enabled || value.is_empty() {
            return value.to_string();
        }
        let Some(keys) = self.keys.get(domain_id) else {
            warn!(domain_id, "no DEK for domain; storing value unencrypted");
            return value.to_string();
        };
        let Some(current) = keys.current else {
            // Disabled domain or decrypt-all window: plaintext by design.
            debug!(domain_id, "domain has no current key; storing value unencrypted");
            return value.to_string();
        };

        match FieldCipher::new(&current).and_then(|cipher| cipher.encrypt_str(value)) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                error!(%e, domain_id, "field encryption failed; storing value unencrypted");
                value.to_string()
            }
        }
    }

    /// Decrypt a field value.
    ///
    /// While the domain is mid-rotation the previous DEK is tried first
    /// (not-yet-migrated records), falling through to the current DEK.
    /// If no key decrypts the value it is returned unchanged: at info
    /// level inside a rotation/disabled window (the value was most
    /// likely never encrypted), at error level otherwise (likely
    /// corruption or misconfiguration).
    pub fn decrypt(&self, value: &str, domain_id: &str) -> String {
        if !self.enabled || value.is_empty() {
            return value.to_string();
        }
        let Some(keys) = self.keys.get(domain_id) else {
            warn!(domain_id, "no DEK for domain; returning value as-is");
            return value.to_string();
        };

        if keys.rotation_in_progress {
            if let Some(previous) = &keys.previous {
                match try_decrypt(previous, value) {
                    Ok(plaintext) => return plaintext,
                    Err(e) => {
                        info!(%e, domain_id, "previous DEK did not decrypt value; trying current");
                    }
                }
            }
        }

        if let Some(current) = &keys.current {
            match try_decrypt(current, value) {
                Ok(plaintext) => return plaintext,
                Err(e) => {
                    if keys.rotation_in_progress || keys.disabled {
                        info!(
                            %e,
                            domain_id,
                            "value not decryptable mid-rotation; assuming never encrypted"
                        );
                    } else {
                        error!(
                            %e,
                            domain_id,
                            "value not decryptable with any DEK; returning as-is (possible \
                             corruption or misconfiguration)"
                        );
                    }
                    return value.to_string();
                }
            }
        }

        // No current key: permanently decrypted or mid decrypt-all.
        if keys.disabled || keys.rotation_in_progress {
            debug!(domain_id, "domain has no current key; returning value as-is");
        } else {
            warn!(domain_id, "domain has no keys at all; returning value as-is");
        }
        value.to_string()
    }
}

fn try_decrypt(key: &[u8], value: &str) -> Result<String, fieldseal_crypto::CryptoError> {
    FieldCipher::new(key)?.decrypt_str(value)
}

/// The persistence layer's per-field transformation is exactly
/// encrypt-on-save / decrypt-on-load.
impl FieldCodec for DataEncryptionService {
    fn decode(&self, domain_id: &str, value: &str) -> String {
        self.decrypt(value, domain_id)
    }

    fn encode(&self, domain_id: &str, value: &str) -> String {
        self.encrypt(value, domain_id)
    }
}
