//! Key Encryption Service: holds the KEKs and wraps/unwraps DEK material.
//!
//! Never sees field plaintext. The in-memory KEK state is mutated only
//! at startup (load) and when a KEK rotation completes.

use fieldseal_crypto::{
    base64url_decode, base64url_encode, keystore, unwrap_dek, wrap_dek, AES_KEY_LENGTH,
    WRAPPED_DEK_SIZE,
};
use parking_lot::RwLock;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::config::EncryptionConfig;
use crate::error::RotationError;

struct KekState {
    current: Zeroizing<[u8; AES_KEY_LENGTH]>,
    previous: Option<Zeroizing<[u8; AES_KEY_LENGTH]>>,
    rotation_in_progress: bool,
}

/// KEK holder. `None` state means encryption is disabled and key bytes
/// pass through unwrapped.
pub struct KeyEncryptionService {
    state: RwLock<Option<KekState>>,
}

impl KeyEncryptionService {
    /// Load KEKs per the configuration.
    ///
    /// A configured previous keystore signals an in-progress KEK rotation
    /// that the rotation service completes at startup. Any key-load
    /// failure here is fatal: the process must not start with an
    /// unusable KEK.
    pub fn init(config: &EncryptionConfig) -> Result<Self, RotationError> {
        config.validate()?;
        if !config.enabled() {
            return Ok(Self {
                state: RwLock::new(None),
            });
        }

        let current_ref = config.current_keystore.as_ref().ok_or_else(|| {
            RotationError::Config("current keystore missing in kek-from-keystore mode".into())
        })?;
        let current =
            keystore::load_key(&current_ref.path, &current_ref.password, &current_ref.alias)?;

        let previous = match &config.previous_keystore {
            None => None,
            Some(previous_ref) => {
                info!(
                    path = %previous_ref.path.display(),
                    "previous KEK configured; KEK rotation will complete at startup"
                );
                Some(keystore::load_key(
                    &previous_ref.path,
                    &previous_ref.password,
                    &previous_ref.alias,
                )?)
            }
        };

        let rotation_in_progress = previous.is_some();
        Ok(Self {
            state: RwLock::new(Some(KekState {
                current,
                previous,
                rotation_in_progress,
            })),
        })
    }

    /// True while DEK records still need re-wrapping under the new KEK.
    pub fn kek_rotation_in_progress(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .map(|s| s.rotation_in_progress)
            .unwrap_or(false)
    }

    /// Wrap raw DEK bytes under the current KEK. Returns base64url text.
    ///
    /// Always wraps with the current KEK, never the previous one. If
    /// wrapping fails the raw bytes are re-encoded instead so the system
    /// keeps functioning (data is at-rest-unprotected, not unavailable);
    /// the degradation is logged at error level.
    pub fn wrap(&self, dek: &[u8]) -> String {
        let guard = self.state.read();
        let Some(state) = guard.as_ref() else {
            return base64url_encode(dek);
        };
        match wrap_dek(dek, state.current.as_slice()) {
            Ok(wrapped) => base64url_encode(&wrapped),
            Err(e) => {
                error!(%e, "DEK wrap failed; storing key material unwrapped");
                base64url_encode(dek)
            }
        }
    }

    /// Unwrap base64url-encoded wrapped DEK bytes.
    ///
    /// While a KEK rotation is in progress the previous KEK is tried
    /// first, then the current one; this recovers automatically from a
    /// crash between the keystore swap and the DEK re-wrap pass.
    /// Returns `None` if no configured KEK can unwrap the value.
    pub fn unwrap(&self, wrapped: &str) -> Option<Zeroizing<Vec<u8>>> {
        let bytes = match base64url_decode(wrapped) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%e, "wrapped DEK is not decodable");
                return None;
            }
        };

        let guard = self.state.read();
        let Some(state) = guard.as_ref() else {
            return Some(Zeroizing::new(bytes));
        };

        // Degraded output of a failed wrap: raw key bytes, never wrapped.
        if bytes.len() == AES_KEY_LENGTH {
            warn!("wrapped DEK has raw-key size; treating as unwrapped (degraded) key material");
            return Some(Zeroizing::new(bytes));
        }
        if bytes.len() != WRAPPED_DEK_SIZE {
            warn!(got = bytes.len(), "wrapped DEK has unexpected size");
            return None;
        }

        if state.rotation_in_progress {
            if let Some(previous) = &state.previous {
                match unwrap_dek(&bytes, previous.as_slice()) {
                    Ok(dek) => return Some(Zeroizing::new(dek)),
                    Err(e) => {
                        info!(%e, "previous KEK did not unwrap DEK; retrying with current KEK");
                    }
                }
            }
        }

        match unwrap_dek(&bytes, state.current.as_slice()) {
            Ok(dek) => Some(Zeroizing::new(dek)),
            Err(e) => {
                warn!(%e, "current KEK did not unwrap DEK");
                None
            }
        }
    }

    /// Mark the KEK rotation finished and drop the previous KEK.
    pub fn finish_kek_rotation(&self) {
        let mut guard = self.state.write();
        if let Some(state) = guard.as_mut() {
            state.previous = None;
            state.rotation_in_progress = false;
            info!("KEK rotation finished; previous KEK dropped from memory");
        }
    }
}
