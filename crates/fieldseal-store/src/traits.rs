//! Persistence traits for the key-rotation subsystem.
//!
//! The rotation service talks to storage only through these traits;
//! `SqliteKeyStore` is the bundled implementation.

use crate::error::StoreError;
use crate::types::{DekRecord, EncryptionMetadata};

/// CRUD for DEK records, keyed by domain id.
pub trait DekStore: Send + Sync {
    /// Fetch the record for one domain, if any.
    fn get(&self, domain_id: &str) -> Result<Option<DekRecord>, StoreError>;

    /// Snapshot of every DEK record, ordered by domain id.
    fn list(&self) -> Result<Vec<DekRecord>, StoreError>;

    /// Insert or replace the record for `record.domain_id`.
    fn save(&self, record: &DekRecord) -> Result<(), StoreError>;

    /// Delete every DEK record. Only used by the decrypt-all finalize step.
    fn delete_all(&self) -> Result<(), StoreError>;
}

/// Access to the single-row encryption metadata record.
pub trait MetadataStore: Send + Sync {
    /// Read the metadata row, creating a default one if absent.
    fn get_or_create(&self) -> Result<EncryptionMetadata, StoreError>;

    /// Persist the metadata row.
    fn update(&self, metadata: &EncryptionMetadata) -> Result<(), StoreError>;

    /// Delete the metadata row. Only used by the decrypt-all finalize step.
    fn delete(&self) -> Result<(), StoreError>;
}
