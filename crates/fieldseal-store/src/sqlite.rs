//! SQLite-backed key store: DEK records plus the metadata singleton.
//!
//! Timestamps are stored as RFC 3339 TEXT. The connection is shared
//! behind a `parking_lot::Mutex` so one store (and any column owners
//! built over the same connection) can be used across threads.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::traits::{DekStore, MetadataStore};
use crate::types::{DekRecord, EncryptionMetadata};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS data_encryption_keys (
    domain_id TEXT PRIMARY KEY,
    current_key TEXT,
    previous_key TEXT,
    rotation_in_progress INTEGER NOT NULL DEFAULT 0,
    disabled INTEGER NOT NULL DEFAULT 0,
    last_rotation_time TEXT
);
CREATE TABLE IF NOT EXISTS encryption_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    kek_last_rotation_time TEXT,
    rotation_schedule_enabled INTEGER NOT NULL DEFAULT 0,
    rotation_period_days INTEGER
);
";

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match raw {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| StoreError::InvalidTimestamp(text)),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(DekRecord, Option<String>)> {
    let raw_time: Option<String> = row.get(5)?;
    Ok((
        DekRecord {
            domain_id: row.get(0)?,
            current_key: row.get(1)?,
            previous_key: row.get(2)?,
            rotation_in_progress: row.get(3)?,
            disabled: row.get(4)?,
            last_rotation_time: None,
        },
        raw_time,
    ))
}

/// SQLite store for `DekRecord`s and the `EncryptionMetadata` singleton.
pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating the schema if needed.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The shared connection handle, for building column owners over the
    /// same database file.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

impl DekStore for SqliteKeyStore {
    fn get(&self, domain_id: &str) -> Result<Option<DekRecord>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT domain_id, current_key, previous_key, rotation_in_progress, disabled,
                        last_rotation_time
                 FROM data_encryption_keys WHERE domain_id = ?1",
                params![domain_id],
                row_to_record,
            )
            .optional()?;
        match found {
            None => Ok(None),
            Some((mut record, raw_time)) => {
                record.last_rotation_time = parse_timestamp(raw_time)?;
                Ok(Some(record))
            }
        }
    }

    fn list(&self) -> Result<Vec<DekRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT domain_id, current_key, previous_key, rotation_in_progress, disabled,
                    last_rotation_time
             FROM data_encryption_keys ORDER BY domain_id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, raw_time) = row?;
            record.last_rotation_time = parse_timestamp(raw_time)?;
            records.push(record);
        }
        Ok(records)
    }

    fn save(&self, record: &DekRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO data_encryption_keys
                 (domain_id, current_key, previous_key, rotation_in_progress, disabled,
                  last_rotation_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(domain_id) DO UPDATE SET
                 current_key = excluded.current_key,
                 previous_key = excluded.previous_key,
                 rotation_in_progress = excluded.rotation_in_progress,
                 disabled = excluded.disabled,
                 last_rotation_time = excluded.last_rotation_time",
            params![
                record.domain_id,
                record.current_key,
                record.previous_key,
                record.rotation_in_progress,
                record.disabled,
                record.last_rotation_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM data_encryption_keys", [])?;
        Ok(())
    }
}

impl MetadataStore for SqliteKeyStore {
    fn get_or_create(&self) -> Result<EncryptionMetadata, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO encryption_metadata (id) VALUES (1)",
            [],
        )?;
        let (raw_time, schedule_enabled, period_days): (Option<String>, bool, Option<u32>) = conn
            .query_row(
                "SELECT kek_last_rotation_time, rotation_schedule_enabled, rotation_period_days
                 FROM encryption_metadata WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        Ok(EncryptionMetadata {
            kek_last_rotation_time: parse_timestamp(raw_time)?,
            rotation_schedule_enabled: schedule_enabled,
            rotation_period_days: period_days,
        })
    }

    fn update(&self, metadata: &EncryptionMetadata) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO encryption_metadata
                 (id, kek_last_rotation_time, rotation_schedule_enabled, rotation_period_days)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 kek_last_rotation_time = excluded.kek_last_rotation_time,
                 rotation_schedule_enabled = excluded.rotation_schedule_enabled,
                 rotation_period_days = excluded.rotation_period_days",
            params![
                metadata.kek_last_rotation_time.map(|t| t.to_rfc3339()),
                metadata.rotation_schedule_enabled,
                metadata.rotation_period_days,
            ],
        )?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM encryption_metadata", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_record_is_none() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        assert!(store.get("customer-pii").unwrap().is_none());
    }

    #[test]
    fn save_and_get_round_trip() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let record = DekRecord {
            domain_id: "customer-pii".into(),
            current_key: Some("wrapped-new".into()),
            previous_key: Some("wrapped-old".into()),
            rotation_in_progress: true,
            disabled: false,
            last_rotation_time: Some(Utc::now()),
        };
        store.save(&record).unwrap();

        let loaded = store.get("customer-pii").unwrap().unwrap();
        assert_eq!(loaded.domain_id, record.domain_id);
        assert_eq!(loaded.current_key, record.current_key);
        assert_eq!(loaded.previous_key, record.previous_key);
        assert!(loaded.rotation_in_progress);
        assert!(!loaded.disabled);
        // RFC 3339 keeps sub-second precision
        assert_eq!(loaded.last_rotation_time, record.last_rotation_time);
    }

    #[test]
    fn save_is_upsert() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let mut record = DekRecord::new("customer-pii");
        record.current_key = Some("v1".into());
        store.save(&record).unwrap();

        record.current_key = Some("v2".into());
        store.save(&record).unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(
            store.get("customer-pii").unwrap().unwrap().current_key,
            Some("v2".into())
        );
    }

    #[test]
    fn list_is_ordered_by_domain() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.save(&DekRecord::new("b-domain")).unwrap();
        store.save(&DekRecord::new("a-domain")).unwrap();
        let domains: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.domain_id)
            .collect();
        assert_eq!(domains, vec!["a-domain", "b-domain"]);
    }

    #[test]
    fn delete_all_empties_the_table() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.save(&DekRecord::new("a")).unwrap();
        store.save(&DekRecord::new("b")).unwrap();
        store.delete_all().unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn metadata_created_on_first_access() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let meta = store.get_or_create().unwrap();
        assert_eq!(meta, EncryptionMetadata::default());
    }

    #[test]
    fn metadata_save_round_trip() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let meta = EncryptionMetadata {
            kek_last_rotation_time: Some(Utc::now()),
            rotation_schedule_enabled: true,
            rotation_period_days: Some(90),
        };
        store.update(&meta).unwrap();
        assert_eq!(store.get_or_create().unwrap(), meta);
    }

    #[test]
    fn metadata_is_single_row() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.get_or_create().unwrap();
        let meta = EncryptionMetadata {
            kek_last_rotation_time: None,
            rotation_schedule_enabled: true,
            rotation_period_days: Some(30),
        };
        store.update(&meta).unwrap();
        store.get_or_create().unwrap();

        let conn = store.connection();
        let count: i64 = conn
            .lock()
            .query_row("SELECT COUNT(*) FROM encryption_metadata", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn metadata_delete() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store
            .update(&EncryptionMetadata {
                kek_last_rotation_time: Some(Utc::now()),
                rotation_schedule_enabled: false,
                rotation_period_days: None,
            })
            .unwrap();
        MetadataStore::delete(&store).unwrap();
        // Recreated fresh on next access
        assert_eq!(store.get_or_create().unwrap(), EncryptionMetadata::default());
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store
            .connection()
            .lock()
            .execute(
                "INSERT INTO data_encryption_keys (domain_id, last_rotation_time)
                 VALUES ('bad', 'not-a-time')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.get("bad"),
            Err(StoreError::InvalidTimestamp(_))
        ));
    }
}
