//! Unpadded base64url text encoding for ciphertext and wrapped keys.
//!
//! Every binary value this crate hands to the persistence layer goes
//! through these helpers, so stored columns stay plain TEXT.

use base64ct::{Base64UrlUnpadded, Encoding};

use crate::error::CryptoError;

/// Base64url encode bytes without padding.
pub fn base64url_encode(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(data)
}

/// Base64url decode a string to bytes.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Base64UrlUnpadded::decode_vec(s).map_err(|e| CryptoError::DecodeFailed(e.to_string()))
}
