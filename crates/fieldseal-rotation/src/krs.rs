//! Key Rotation Service: the orchestrator.
//!
//! Owns every mutation of DEK records and of the unwrapped-key cache.
//! Rotation is resumable by construction: the persisted
//! `rotation_in_progress` flag plus the previous/current key pair is the
//! whole recovery state, so a crash at any point is repaired by simply
//! re-running `rotate` for the domain.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fieldseal_crypto::generate_dek;
use fieldseal_store::{DekRecord, DekStore, EncryptedFieldOwner, MetadataStore};
use tracing::{debug, error, info, warn};

use crate::cache::{DomainKeyCache, DomainKeys};
use crate::config::EncryptionConfig;
use crate::error::RotationError;
use crate::kes::KeyEncryptionService;

type OwnerIndex = HashMap<String, Vec<Arc<dyn EncryptedFieldOwner>>>;

pub struct KeyRotationService {
    config: EncryptionConfig,
    kes: Arc<KeyEncryptionService>,
    deks: Arc<dyn DekStore>,
    metadata: Arc<dyn MetadataStore>,
    /// Domain → owning entity stores. Built once, read-only afterwards.
    owners_by_domain: OwnerIndex,
    keys: Arc<DomainKeyCache>,
}

impl KeyRotationService {
    pub fn new(
        config: EncryptionConfig,
        kes: Arc<KeyEncryptionService>,
        deks: Arc<dyn DekStore>,
        metadata: Arc<dyn MetadataStore>,
        owners: Vec<Arc<dyn EncryptedFieldOwner>>,
        keys: Arc<DomainKeyCache>,
    ) -> Self {
        let mut owners_by_domain: OwnerIndex = HashMap::new();
        for owner in owners {
            for domain_id in owner.domain_ids() {
                owners_by_domain
                    .entry(domain_id)
                    .or_default()
                    .push(Arc::clone(&owner));
            }
        }
        Self {
            config,
            kes,
            deks,
            metadata,
            owners_by_domain,
            keys,
        }
    }

    /// Startup, phase 1: complete a pending KEK rotation.
    ///
    /// Re-wraps every DEK record's key material under the new current
    /// KEK, then drops the previous KEK and stamps the metadata row.
    /// Runs before any DEK recovery so that recovery works over
    /// freshly-wrapped keys.
    pub fn on_startup(&self) -> Result<(), RotationError> {
        if !self.config.enabled() {
            return Ok(());
        }
        if !self.kes.kek_rotation_in_progress() {
            return Ok(());
        }

        info!("completing KEK rotation: re-wrapping all DEK records");
        for mut record in self.deks.list()? {
            record.current_key = record
                .current_key
                .as_deref()
                .map(|wrapped| self.rewrap(&record.domain_id, wrapped));
            record.previous_key = record
                .previous_key
                .as_deref()
                .map(|wrapped| self.rewrap(&record.domain_id, wrapped));
            self.deks.save(&record)?;
        }
        self.kes.finish_kek_rotation();

        let mut metadata = self.metadata.get_or_create()?;
        metadata.kek_last_rotation_time = Some(Utc::now());
        self.metadata.update(&metadata)?;
        Ok(())
    }

    /// Unwrap-then-wrap one stored key under the current KEK. Keeps the
    /// stored value unchanged if no KEK can unwrap it (logged; the next
    /// unwrap attempt will fail the same way and fail open downstream).
    fn rewrap(&self, domain_id: &str, wrapped: &str) -> String {
        match self.kes.unwrap(wrapped) {
            Some(dek) => self.kes.wrap(&dek),
            None => {
                error!(domain_id, "cannot re-wrap DEK under new KEK; leaving value unchanged");
                wrapped.to_string()
            }
        }
    }

    /// Startup, phase 2: crash recovery, then mode-specific work.
    ///
    /// Resumes any rotation that was mid-flight when the process died.
    /// In decrypt-all mode, permanently decrypts every domain. In normal
    /// mode, bootstraps a DEK (and encrypts pre-existing plaintext) for
    /// every registered domain that has none yet — bootstrap and rotate
    /// are deliberately the same operation.
    pub fn on_ready(&self) -> Result<(), RotationError> {
        if !self.config.enabled() {
            return Ok(());
        }

        self.refresh_keys()?;

        for record in self.deks.list()? {
            if record.rotation_in_progress {
                info!(
                    domain_id = %record.domain_id,
                    "resuming DEK rotation interrupted by shutdown"
                );
                self.rotate(&record.domain_id)?;
            }
        }

        if self.config.decrypt_all {
            self.decrypt_all_domains()?;
        } else {
            let mut domains: Vec<&String> = self.owners_by_domain.keys().collect();
            domains.sort();
            for domain_id in domains {
                if self.deks.get(domain_id)?.is_none() {
                    info!(domain_id, "bootstrapping encryption for new domain");
                    self.rotate(domain_id)?;
                }
            }
        }
        Ok(())
    }

    fn decrypt_all_domains(&self) -> Result<(), RotationError> {
        warn!("decrypt-all mode: permanently decrypting every domain");
        for mut record in self.deks.list()? {
            // Already finalized (possibly by a previous interrupted run)
            if record.disabled && !record.rotation_in_progress && record.current_key.is_none() {
                continue;
            }
            record.previous_key = record.current_key.take();
            record.rotation_in_progress = record.previous_key.is_some();
            record.disabled = true;
            self.deks.save(&record)?;
            self.refresh_domain(&record);
            if record.rotation_in_progress {
                self.rotate(&record.domain_id)?;
            }
        }
        Ok(())
    }

    /// Rotate one domain's DEK. Resumes if a rotation is already in
    /// progress; bootstraps a record if none exists.
    ///
    /// Step 1 (durability checkpoint): persist previous=old, current=new,
    /// `rotation_in_progress=true` before any bulk work.
    /// Step 2: re-save every owning entity type page by page, so each
    /// field re-encrypts under the new current key. Idempotent.
    /// Step 3: persist `rotation_in_progress=false`.
    pub fn rotate(&self, domain_id: &str) -> Result<(), RotationError> {
        if !self.config.enabled() {
            debug!(domain_id, "encryption disabled; rotation skipped");
            return Ok(());
        }

        let mut record = match self.deks.get(domain_id)? {
            Some(record) => record,
            None => DekRecord::new(domain_id),
        };
        if record.disabled && !record.rotation_in_progress {
            info!(domain_id, "domain is disabled; rotation skipped");
            return Ok(());
        }

        if record.rotation_in_progress {
            info!(domain_id, "rotation already in progress; resuming");
        } else {
            let dek = generate_dek()?;
            record.previous_key = record.current_key.take();
            record.current_key = Some(self.kes.wrap(&dek));
            record.rotation_in_progress = true;
            self.deks.save(&record)?;
            info!(domain_id, "new DEK generated; starting bulk re-encryption");
        }
        self.refresh_domain(&record);

        self.resave_owners(domain_id)?;

        record.rotation_in_progress = false;
        record.previous_key = None;
        record.last_rotation_time = Some(Utc::now());
        self.deks.save(&record)?;
        self.refresh_domain(&record);
        info!(domain_id, "rotation complete");
        Ok(())
    }

    /// Rotate every domain, skipping disabled and already-rotating ones.
    /// Domains are processed sequentially; a failure aborts the pass and
    /// leaves the failing domain resumable.
    pub fn rotate_all(&self) -> Result<(), RotationError> {
        if !self.config.enabled() {
            return Ok(());
        }
        for record in self.deks.list()? {
            if record.disabled {
                info!(domain_id = %record.domain_id, "skipping disabled domain");
                continue;
            }
            if record.rotation_in_progress {
                info!(
                    domain_id = %record.domain_id,
                    "skipping domain with rotation already in progress"
                );
                continue;
            }
            self.rotate(&record.domain_id)?;
        }
        Ok(())
    }

    /// Periodic entry point for scheduled rotation (e.g. daily).
    pub fn tick(&self) -> Result<(), RotationError> {
        if !self.config.enabled() {
            return Ok(());
        }
        let metadata = self.metadata.get_or_create()?;
        if !metadata.rotation_schedule_enabled {
            return Ok(());
        }
        let Some(period_days) = metadata.rotation_period_days else {
            warn!("rotation schedule enabled but no period set; skipping pass");
            return Ok(());
        };

        let now = Utc::now();
        let period = chrono::Duration::days(i64::from(period_days));
        for record in self.deks.list()? {
            if record.disabled || record.rotation_in_progress {
                continue;
            }
            let due = match record.last_rotation_time {
                None => true,
                Some(last) => now.signed_duration_since(last) >= period,
            };
            if due {
                info!(domain_id = %record.domain_id, "scheduled rotation due");
                self.rotate(&record.domain_id)?;
            }
        }
        Ok(())
    }

    /// Decrypt-all finalize: drop every DEK record and the metadata row.
    /// Irreversible; only ever intended for a one-time migration away
    /// from encryption.
    pub fn on_shutdown(&self) -> Result<(), RotationError> {
        if !self.config.enabled() || !self.config.decrypt_all {
            return Ok(());
        }
        warn!("decrypt-all finalize: deleting all DEK records and encryption metadata");
        self.deks.delete_all()?;
        self.metadata.delete()?;
        self.keys.clear();
        Ok(())
    }

    /// Read-only snapshot of every DEK record, for status surfaces.
    pub fn list_keys(&self) -> Result<Vec<DekRecord>, RotationError> {
        Ok(self.deks.list()?)
    }

    /// Configure the automatic rotation schedule.
    pub fn set_rotation_schedule(
        &self,
        enabled: bool,
        period_days: Option<u32>,
    ) -> Result<(), RotationError> {
        if enabled && !matches!(period_days, Some(days) if days > 0) {
            return Err(RotationError::Config(
                "enabling the rotation schedule requires a positive period in days".into(),
            ));
        }
        let mut metadata = self.metadata.get_or_create()?;
        metadata.rotation_schedule_enabled = enabled;
        metadata.rotation_period_days = if enabled { period_days } else { None };
        self.metadata.update(&metadata)?;
        info!(enabled, ?period_days, "rotation schedule updated");
        Ok(())
    }

    /// Reload every persisted DEK record into the unwrapped-key cache.
    pub fn refresh_keys(&self) -> Result<(), RotationError> {
        for record in self.deks.list()? {
            self.refresh_domain(&record);
        }
        Ok(())
    }

    fn refresh_domain(&self, record: &DekRecord) {
        let current = record
            .current_key
            .as_deref()
            .and_then(|wrapped| self.kes.unwrap(wrapped));
        let previous = record
            .previous_key
            .as_deref()
            .and_then(|wrapped| self.kes.unwrap(wrapped));
        self.keys.insert(
            record.domain_id.clone(),
            DomainKeys {
                current,
                previous,
                rotation_in_progress: record.rotation_in_progress,
                disabled: record.disabled,
            },
        );
    }

    fn resave_owners(&self, domain_id: &str) -> Result<(), RotationError> {
        let Some(owners) = self.owners_by_domain.get(domain_id) else {
            debug!(domain_id, "no registered entity types for domain; nothing to re-save");
            return Ok(());
        };
        let page_size = self.config.page_size;
        for owner in owners {
            let mut page = 0u64;
            loop {
                let rows = owner.resave_page(page, page_size)?;
                debug!(
                    entity_type = owner.entity_type(),
                    page, rows, "re-saved entity page"
                );
                if rows < page_size {
                    break;
                }
                page += 1;
            }
        }
        Ok(())
    }
}
