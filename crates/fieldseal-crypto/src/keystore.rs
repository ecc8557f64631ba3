//! Password-protected key container files.
//!
//! A container is a JSON file holding named 256-bit keys. The container
//! key is derived from the password with Argon2id; each entry is sealed
//! with AES-256-GCM under that derived key. A wrong password surfaces as
//! a GCM authentication failure when unsealing an entry.
//!
//! Layout:
//! ```json
//! {
//!   "version": 1,
//!   "kdf": { "m_cost": 19456, "t_cost": 2, "p_cost": 1 },
//!   "salt": "<base64url>",
//!   "entries": { "<alias>": { "iv": "<base64url>", "key": "<base64url>" } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::CryptoError;
use crate::types::{AES_GCM_IV_LENGTH, AES_KEY_LENGTH};

/// Container format version.
const CONTAINER_VERSION: u32 = 1;

/// Argon2id salt length in bytes.
const SALT_LENGTH: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParams {
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP-recommended Argon2id "low memory" parameters.
        Self {
            m_cost: 19_456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedKey {
    iv: String,
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyContainer {
    version: u32,
    kdf: KdfParams,
    salt: String,
    entries: BTreeMap<String, SealedKey>,
}

fn io_err(path: &Path, source: std::io::Error) -> CryptoError {
    CryptoError::KeystoreIo {
        path: path.display().to_string(),
        source,
    }
}

fn derive_container_key(
    password: &str,
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, CryptoError> {
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(AES_KEY_LENGTH))
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    argon2
        .hash_password_into(password.as_bytes(), salt, out.as_mut_slice())
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    Ok(out)
}

fn read_container(path: &Path) -> Result<KeyContainer, CryptoError> {
    let raw = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let container: KeyContainer =
        serde_json::from_str(&raw).map_err(|e| CryptoError::KeystoreParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if container.version != CONTAINER_VERSION {
        return Err(CryptoError::KeystoreVersion(container.version));
    }
    Ok(container)
}

/// Load a named key from a container file.
///
/// Fatal errors by design: a process that cannot load its KEK must not
/// start, so every failure here is surfaced to the caller.
pub fn load_key(
    path: &Path,
    password: &str,
    alias: &str,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, CryptoError> {
    let container = read_container(path)?;
    let salt = base64url_decode(&container.salt)?;
    let entry = container
        .entries
        .get(alias)
        .ok_or_else(|| CryptoError::MissingAlias(alias.to_string()))?;

    let container_key = derive_container_key(password, &salt, &container.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(container_key.as_slice())
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;

    let iv = base64url_decode(&entry.iv)?;
    if iv.len() != AES_GCM_IV_LENGTH {
        return Err(CryptoError::KeystoreUnseal);
    }
    let sealed = base64url_decode(&entry.key)?;
    let unsealed = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|_| CryptoError::KeystoreUnseal)?;

    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    if unsealed.len() != AES_KEY_LENGTH {
        return Err(CryptoError::KeystoreUnseal);
    }
    key.copy_from_slice(&unsealed);
    Ok(key)
}

/// Store a named key in a container file, creating the file if absent.
///
/// An existing container keeps its salt and KDF parameters; the entry
/// for `alias` is replaced if present. Used by operators and tests to
/// provision KEK containers.
pub fn store_key(
    path: &Path,
    password: &str,
    alias: &str,
    key: &[u8; AES_KEY_LENGTH],
) -> Result<(), CryptoError> {
    let mut container = if path.exists() {
        read_container(path)?
    } else {
        let mut salt = [0u8; SALT_LENGTH];
        getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        KeyContainer {
            version: CONTAINER_VERSION,
            kdf: KdfParams::default(),
            salt: base64url_encode(&salt),
            entries: BTreeMap::new(),
        }
    };

    let salt = base64url_decode(&container.salt)?;
    let container_key = derive_container_key(password, &salt, &container.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(container_key.as_slice())
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;

    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), key.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    container.entries.insert(
        alias.to_string(),
        SealedKey {
            iv: base64url_encode(&iv),
            key: base64url_encode(&sealed),
        },
    );

    let serialized =
        serde_json::to_string_pretty(&container).map_err(|e| CryptoError::KeystoreParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    fs::write(path, serialized).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// List the aliases present in a container file (no password required).
pub fn list_aliases(path: &Path) -> Result<Vec<String>, CryptoError> {
    let container = read_container(path)?;
    Ok(container.entries.keys().cloned().collect())
}
