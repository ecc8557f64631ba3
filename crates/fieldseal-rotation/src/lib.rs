pub mod cache;
pub mod config;
pub mod des;
pub mod error;
pub mod kes;
pub mod krs;
pub mod scheduler;

pub use cache::{DomainKeyCache, DomainKeys};
pub use config::{EncryptionConfig, EncryptionMode, KeystoreRef, DEFAULT_PAGE_SIZE};
pub use des::DataEncryptionService;
pub use error::RotationError;
pub use kes::KeyEncryptionService;
pub use krs::KeyRotationService;
pub use scheduler::RotationScheduler;
