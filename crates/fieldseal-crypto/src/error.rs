use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid DEK length: expected {expected} bytes, got {got}")]
    InvalidDekLength { expected: usize, got: usize },

    #[error("Invalid wrapped DEK length: expected {expected} bytes, got {got}")]
    InvalidWrappedDekLength { expected: usize, got: usize },

    #[error("Encrypted data too short")]
    DataTooShort,

    #[error("Unsupported encryption version: {0}")]
    UnsupportedVersion(u8),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("AES-KW wrap failed: {0}")]
    WrapFailed(String),

    #[error("AES-KW unwrap failed: {0}")]
    UnwrapFailed(String),

    #[error("Base64url decode failed: {0}")]
    DecodeFailed(String),

    #[error("Decrypted value is not valid UTF-8")]
    InvalidUtf8,

    #[error("Key container I/O error at {path}: {source}")]
    KeystoreIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key container at {path} is not parseable: {message}")]
    KeystoreParse { path: String, message: String },

    #[error("Unsupported key container version: {0}")]
    KeystoreVersion(u32),

    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Key container unseal failed (wrong password or corrupt container)")]
    KeystoreUnseal,

    #[error("No key with alias \"{0}\" in key container")]
    MissingAlias(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
