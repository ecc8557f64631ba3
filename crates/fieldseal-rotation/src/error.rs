use fieldseal_crypto::CryptoError;
use fieldseal_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
