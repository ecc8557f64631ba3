//! Per-domain Data Encryption Key (DEK) primitives.
//!
//! Each encryption domain owns a random 256-bit DEK. Field values are
//! encrypted with the DEK; the DEK itself is wrapped (encrypted) with the
//! KEK using AES-KW before it is persisted.
//!
//! Wrapped DEK wire format: AES-KW(KEK, DEK) = 40 bytes for a 32-byte key.

use aes_kw::KekAes256;

use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

/// Size of a wrapped DEK in bytes: AES-KW output for a 32-byte key (32 + 8).
pub const WRAPPED_DEK_SIZE: usize = 40;

/// Generate a random 256-bit Data Encryption Key.
pub fn generate_dek() -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let mut dek = [0u8; AES_KEY_LENGTH];
    getrandom::getrandom(&mut dek).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(dek)
}

fn kek_from_slice(kek: &[u8]) -> Result<KekAes256, CryptoError> {
    let kek_array: [u8; AES_KEY_LENGTH] =
        kek.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: kek.len(),
        })?;
    Ok(KekAes256::from(kek_array))
}

/// Wrap a DEK with a KEK using AES-KW.
///
/// # Arguments
/// * `dek` - 32-byte Data Encryption Key
/// * `kek` - 32-byte Key Encryption Key
///
/// # Returns
/// 40-byte wrapped DEK
pub fn wrap_dek(dek: &[u8], kek: &[u8]) -> Result<[u8; WRAPPED_DEK_SIZE], CryptoError> {
    if dek.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidDekLength {
            expected: AES_KEY_LENGTH,
            got: dek.len(),
        });
    }
    let kek_key = kek_from_slice(kek)?;
    let mut wrapped = [0u8; WRAPPED_DEK_SIZE];
    kek_key
        .wrap(dek, &mut wrapped)
        .map_err(|e| CryptoError::WrapFailed(format!("{:?}", e)))?;
    Ok(wrapped)
}

/// Unwrap a DEK from a wrapped DEK blob.
///
/// Fails if the blob was wrapped under a different KEK or has been
/// tampered with (AES-KW has a built-in integrity check).
pub fn unwrap_dek(wrapped_dek: &[u8], kek: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped_dek.len() != WRAPPED_DEK_SIZE {
        return Err(CryptoError::InvalidWrappedDekLength {
            expected: WRAPPED_DEK_SIZE,
            got: wrapped_dek.len(),
        });
    }
    let kek_key = kek_from_slice(kek)?;
    let mut dek = vec![0u8; AES_KEY_LENGTH];
    kek_key
        .unwrap(wrapped_dek, &mut dek)
        .map_err(|e| CryptoError::UnwrapFailed(format!("{:?}", e)))?;
    Ok(dek)
}
