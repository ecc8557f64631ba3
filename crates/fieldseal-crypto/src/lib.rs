pub mod dek;
pub mod encoding;
pub mod error;
pub mod field;
pub mod keystore;
pub mod types;

pub use dek::{generate_dek, unwrap_dek, wrap_dek, WRAPPED_DEK_SIZE};
pub use encoding::{base64url_decode, base64url_encode};
pub use error::CryptoError;
pub use field::FieldCipher;
pub use keystore::{list_aliases, load_key, store_key};
pub use types::{
    AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CURRENT_VERSION, SUPPORTED_VERSIONS,
};
