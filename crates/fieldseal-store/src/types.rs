//! Persisted records of the key-rotation subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state of one encryption domain's Data Encryption Key.
///
/// Exactly one record exists per domain. Key columns hold the DEK in
/// wrapped (KEK-encrypted) text form; raw key material never touches
/// the database.
///
/// Invariant: `disabled` implies `current_key` is `None` once the
/// decrypt-all pass for the domain has completed. A record with
/// `rotation_in_progress` set but no `previous_key` is a first-time
/// bootstrap: there is no old key to fall back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DekRecord {
    /// Stable identifier of the encryption domain.
    pub domain_id: String,
    /// Wrapped current DEK. Always present unless the domain is disabled.
    pub current_key: Option<String>,
    /// Wrapped previous DEK. Present only while a rotation is in progress.
    pub previous_key: Option<String>,
    /// True from the rotation durability checkpoint until bulk re-save completes.
    pub rotation_in_progress: bool,
    /// True once the domain has been permanently decrypted. One-way.
    pub disabled: bool,
    /// Completion time of the last finished rotation.
    pub last_rotation_time: Option<DateTime<Utc>>,
}

impl DekRecord {
    /// A fresh record for a newly discovered domain, no key yet.
    pub fn new(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            current_key: None,
            previous_key: None,
            rotation_in_progress: false,
            disabled: false,
            last_rotation_time: None,
        }
    }
}

/// Global singleton record: KEK rotation bookkeeping and the automatic
/// rotation schedule. `rotation_period_days` must be a positive number
/// whenever the schedule is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub kek_last_rotation_time: Option<DateTime<Utc>>,
    pub rotation_schedule_enabled: bool,
    pub rotation_period_days: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_stable_and_keyless() {
        let record = DekRecord::new("customer-pii");
        assert_eq!(record.domain_id, "customer-pii");
        assert!(record.current_key.is_none());
        assert!(record.previous_key.is_none());
        assert!(!record.rotation_in_progress);
        assert!(!record.disabled);
        assert!(record.last_rotation_time.is_none());
    }

    #[test]
    fn metadata_defaults_to_schedule_off() {
        let meta = EncryptionMetadata::default();
        assert!(!meta.rotation_schedule_enabled);
        assert!(meta.rotation_period_days.is_none());
    }
}
