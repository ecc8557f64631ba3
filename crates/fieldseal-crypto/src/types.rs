/// Wire format version for encrypted field values.
///
/// Version 1: AES-256-GCM under the domain's current DEK
/// Format: [version=1:1B][IV:12B][ciphertext+tag], base64url-encoded as text
/// DEKs are wrapped separately with AES-KW: 40 bytes for a 32-byte key.
pub const CURRENT_VERSION: u8 = 1;

/// Supported wire format versions (for decryption).
pub const SUPPORTED_VERSIONS: &[u8] = &[1];

/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;
