//! Encryption subsystem configuration.
//!
//! How the host loads this (environment, config file) is its own
//! concern; the subsystem only validates and consumes the parsed form.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RotationError;

/// Records re-saved per page during bulk re-encryption.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// How field encryption is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionMode {
    /// No encryption: values pass through unchanged and no key records
    /// are created or consulted.
    Disabled,
    /// KEK loaded from a password-protected key container file; DEKs are
    /// wrapped under it.
    KekFromKeystore,
}

/// Where to find one KEK inside a key container file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreRef {
    pub path: PathBuf,
    pub password: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub mode: EncryptionMode,
    /// Required in `KekFromKeystore` mode.
    #[serde(default)]
    pub current_keystore: Option<KeystoreRef>,
    /// Presence signals an in-progress KEK rotation to complete at startup.
    #[serde(default)]
    pub previous_keystore: Option<KeystoreRef>,
    /// One-time migration flag: permanently decrypt every domain.
    #[serde(default)]
    pub decrypt_all: bool,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl EncryptionConfig {
    /// Configuration with encryption switched off.
    pub fn disabled() -> Self {
        Self {
            mode: EncryptionMode::Disabled,
            current_keystore: None,
            previous_keystore: None,
            decrypt_all: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Keystore-backed configuration with defaults for everything else.
    pub fn with_keystore(current: KeystoreRef) -> Self {
        Self {
            mode: EncryptionMode::KekFromKeystore,
            current_keystore: Some(current),
            previous_keystore: None,
            decrypt_all: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn enabled(&self) -> bool {
        self.mode == EncryptionMode::KekFromKeystore
    }

    /// Configuration errors are fatal at startup.
    pub fn validate(&self) -> Result<(), RotationError> {
        if self.enabled() && self.current_keystore.is_none() {
            return Err(RotationError::Config(
                "kek-from-keystore mode requires a current keystore path, password and alias"
                    .into(),
            ));
        }
        if self.page_size == 0 {
            return Err(RotationError::Config("page_size must be positive".into()));
        }
        Ok(())
    }
}
