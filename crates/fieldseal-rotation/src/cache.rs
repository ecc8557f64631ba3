//! Unwrapped DEK cache: domain id → usable key material plus rotation flags.
//!
//! The rotation service is the only writer (it unwraps DEKs via the KES
//! and refreshes entries on every persisted state change); the data
//! encryption service only reads. This keeps KES→DES strictly
//! one-directional: DES never unwraps anything itself.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

/// Usable (unwrapped) key material for one domain, mirroring the
/// persisted `DekRecord` flags.
#[derive(Clone)]
pub struct DomainKeys {
    pub current: Option<Zeroizing<Vec<u8>>>,
    pub previous: Option<Zeroizing<Vec<u8>>>,
    pub rotation_in_progress: bool,
    pub disabled: bool,
}

/// Shared read-mostly cache. Dropped or replaced entries zeroize their
/// key material via `Zeroizing`.
#[derive(Default)]
pub struct DomainKeyCache {
    entries: RwLock<HashMap<String, DomainKeys>>,
}

impl DomainKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the entry for a domain.
    pub fn insert(&self, domain_id: impl Into<String>, keys: DomainKeys) {
        self.entries.write().insert(domain_id.into(), keys);
    }

    /// Snapshot of one domain's keys, if known.
    pub fn get(&self, domain_id: &str) -> Option<DomainKeys> {
        self.entries.read().get(domain_id).cloned()
    }

    pub fn remove(&self, domain_id: &str) {
        self.entries.write().remove(domain_id);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
