//! End-to-end rotation behavior over a real SQLite database and real
//! password-protected keystore files. "Restarts" are simulated by
//! rebuilding every service over the same files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use fieldseal_crypto::store_key;
use fieldseal_rotation::{
    DataEncryptionService, DomainKeyCache, EncryptionConfig, KeyEncryptionService,
    KeyRotationService, KeystoreRef, RotationError,
};
use fieldseal_store::{
    DekRecord, DekStore, EncryptedColumn, FieldCodec, MetadataStore, SqliteColumnOwner,
    SqliteKeyStore,
};
use tempfile::TempDir;

const DOMAIN: &str = "customer-pii";
const EMAIL: &str = "ada@example.com";

struct Services {
    kes: Arc<KeyEncryptionService>,
    des: Arc<DataEncryptionService>,
    krs: Arc<KeyRotationService>,
    store: Arc<SqliteKeyStore>,
}

fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).unwrap();
    key
}

fn provision_keystore(dir: &TempDir, file: &str, key: &[u8; 32]) -> KeystoreRef {
    let path = dir.path().join(file);
    store_key(&path, "pw", "master", key).unwrap();
    KeystoreRef {
        path,
        password: "pw".into(),
        alias: "master".into(),
    }
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("app.db")
}

/// Build all services over the given database file, as process startup
/// would. Creates the entity table on first use.
fn boot(config: &EncryptionConfig, db: &Path) -> Services {
    let store = Arc::new(SqliteKeyStore::open(db).unwrap());
    store
        .connection()
        .lock()
        .execute_batch("CREATE TABLE IF NOT EXISTS customers (id INTEGER PRIMARY KEY, email TEXT);")
        .unwrap();

    let cache = Arc::new(DomainKeyCache::new());
    let kes = Arc::new(KeyEncryptionService::init(config).unwrap());
    let des = Arc::new(DataEncryptionService::new(
        config.enabled(),
        Arc::clone(&cache),
    ));
    let owner = Arc::new(SqliteColumnOwner::new(
        store.connection(),
        "customers",
        "id",
        vec![EncryptedColumn::new("email", DOMAIN)],
        Arc::clone(&des) as Arc<dyn FieldCodec>,
    ));
    let krs = Arc::new(KeyRotationService::new(
        config.clone(),
        Arc::clone(&kes),
        Arc::clone(&store) as Arc<dyn DekStore>,
        Arc::clone(&store) as Arc<dyn MetadataStore>,
        vec![owner],
        cache,
    ));
    Services {
        kes,
        des,
        krs,
        store,
    }
}

fn insert_customer(services: &Services, id: i64, email: &str) {
    services
        .store
        .connection()
        .lock()
        .execute(
            "INSERT INTO customers (id, email) VALUES (?1, ?2)",
            rusqlite::params![id, email],
        )
        .unwrap();
}

fn stored_email(services: &Services, id: i64) -> String {
    services
        .store
        .connection()
        .lock()
        .query_row(
            "SELECT email FROM customers WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap()
}

fn start(services: &Services) {
    services.krs.on_startup().unwrap();
    services.krs.on_ready().unwrap();
}

#[test]
fn bootstrap_encrypts_preexisting_plaintext() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);

    // The plaintext column was encrypted in place
    let stored = stored_email(&services, 1);
    assert_ne!(stored, EMAIL);
    assert_eq!(services.des.decrypt(&stored, DOMAIN), EMAIL);

    // And the bootstrap produced a completed, stable DEK record
    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(record.current_key.is_some());
    assert!(record.previous_key.is_none());
    assert!(!record.rotation_in_progress);
    assert!(!record.disabled);
    assert!(record.last_rotation_time.is_some());
}

#[test]
fn disabled_mode_creates_and_consults_nothing() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::disabled();

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);

    assert_eq!(stored_email(&services, 1), EMAIL);
    assert_eq!(services.des.encrypt("x", "anything"), "x");
    assert_eq!(services.des.decrypt("x", "anything"), "x");
    assert!(services.krs.list_keys().unwrap().is_empty());
    services.krs.rotate(DOMAIN).unwrap();
    assert!(services.krs.list_keys().unwrap().is_empty());
}

#[test]
fn rotation_reencrypts_rows_and_stays_decryptable() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);
    let before = stored_email(&services, 1);

    services.krs.rotate(DOMAIN).unwrap();

    let after = stored_email(&services, 1);
    assert_ne!(after, before, "row must be re-encrypted under the new DEK");
    assert_eq!(services.des.decrypt(&after, DOMAIN), EMAIL);

    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(!record.rotation_in_progress);
    assert!(record.previous_key.is_none());
}

/// Simulate the crash-safety anchor state: step 1 of a rotation has been
/// persisted (new current, old previous, in-progress flag) but no bulk
/// re-encryption has happened yet.
fn persist_rotation_checkpoint(services: &Services) {
    let record = services.store.get(DOMAIN).unwrap().unwrap();
    let new_dek = fieldseal_crypto::generate_dek().unwrap();
    let checkpoint = DekRecord {
        previous_key: record.current_key.clone(),
        current_key: Some(services.kes.wrap(&new_dek)),
        rotation_in_progress: true,
        ..record
    };
    services.store.save(&checkpoint).unwrap();
}

#[test]
fn previous_key_fallback_inside_rotation_window() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);
    let old_ciphertext = stored_email(&services, 1);

    persist_rotation_checkpoint(&services);
    services.krs.refresh_keys().unwrap();

    // Old ciphertext still reads during the window, via the previous key
    assert_eq!(services.des.decrypt(&old_ciphertext, DOMAIN), EMAIL);
    // Fresh writes already target the new current key
    let fresh = services.des.encrypt(EMAIL, DOMAIN);
    assert_ne!(fresh, old_ciphertext);
    assert_eq!(services.des.decrypt(&fresh, DOMAIN), EMAIL);

    // A targeted rotate resumes and completes the window
    services.krs.rotate(DOMAIN).unwrap();
    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(!record.rotation_in_progress);
    assert!(record.previous_key.is_none());
    assert_eq!(services.des.decrypt(&stored_email(&services, 1), DOMAIN), EMAIL);
}

#[test]
fn resuming_an_in_progress_rotation_loses_no_data() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    insert_customer(&services, 2, "grace@example.com");
    start(&services);

    persist_rotation_checkpoint(&services);
    services.krs.refresh_keys().unwrap();

    // Second call arrives while the first is still "in progress"
    services.krs.rotate(DOMAIN).unwrap();
    services.krs.rotate(DOMAIN).unwrap();

    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(!record.rotation_in_progress);
    assert!(record.current_key.is_some());
    assert!(record.previous_key.is_none());
    assert_eq!(services.des.decrypt(&stored_email(&services, 1), DOMAIN), EMAIL);
    assert_eq!(
        services.des.decrypt(&stored_email(&services, 2), DOMAIN),
        "grace@example.com"
    );
}

#[test]
fn startup_recovery_completes_interrupted_rotation() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));
    let db = db_path(&dir);

    {
        let services = boot(&config, &db);
        insert_customer(&services, 1, EMAIL);
        start(&services);
        persist_rotation_checkpoint(&services);
        // process "crashes" here: no bulk re-save, no completion
    }

    let services = boot(&config, &db);
    start(&services);

    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(!record.rotation_in_progress, "recovery must finish the rotation");
    assert!(record.previous_key.is_none());
    // Rows were migrated to the new current key and read back cleanly
    assert_eq!(services.des.decrypt(&stored_email(&services, 1), DOMAIN), EMAIL);
}

#[test]
fn kek_rotation_rewraps_every_dek_under_the_new_kek() {
    let dir = TempDir::new().unwrap();
    let old_kek = random_key();
    let new_kek = random_key();
    let db = db_path(&dir);

    let old_config = EncryptionConfig::with_keystore(provision_keystore(&dir, "old.json", &old_kek));
    {
        let services = boot(&old_config, &db);
        insert_customer(&services, 1, EMAIL);
        start(&services);
    }

    // Operator swapped keystores: new current, old kept as previous
    let mut swap_config =
        EncryptionConfig::with_keystore(provision_keystore(&dir, "new.json", &new_kek));
    swap_config.previous_keystore = Some(old_config.current_keystore.clone().unwrap());
    {
        let services = boot(&swap_config, &db);
        assert!(services.kes.kek_rotation_in_progress());
        start(&services);
        assert!(!services.kes.kek_rotation_in_progress());
        let metadata = services.store.get_or_create().unwrap();
        assert!(metadata.kek_last_rotation_time.is_some());
    }

    // A later start with only the new KEK can unwrap everything
    let new_only = EncryptionConfig::with_keystore(KeystoreRef {
        path: dir.path().join("new.json"),
        password: "pw".into(),
        alias: "master".into(),
    });
    let services = boot(&new_only, &db);
    start(&services);
    for record in services.krs.list_keys().unwrap() {
        let wrapped = record.current_key.expect("bootstrapped record has a key");
        assert!(services.kes.unwrap(&wrapped).is_some());
    }
    assert_eq!(services.des.decrypt(&stored_email(&services, 1), DOMAIN), EMAIL);
}

#[test]
fn decrypt_all_leaves_plaintext_and_finalize_deletes_state() {
    let dir = TempDir::new().unwrap();
    let keystore = provision_keystore(&dir, "kek.json", &random_key());
    let config = EncryptionConfig::with_keystore(keystore.clone());
    let db = db_path(&dir);

    {
        let services = boot(&config, &db);
        insert_customer(&services, 1, EMAIL);
        start(&services);
        assert_ne!(stored_email(&services, 1), EMAIL);
    }

    let mut decrypt_config = EncryptionConfig::with_keystore(keystore);
    decrypt_config.decrypt_all = true;
    let services = boot(&decrypt_config, &db);
    start(&services);

    // Data is plaintext again and the domain is permanently disabled
    assert_eq!(stored_email(&services, 1), EMAIL);
    let record = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(record.disabled);
    assert!(record.current_key.is_none());
    assert!(!record.rotation_in_progress);

    // New writes stay plaintext
    assert_eq!(services.des.encrypt("fresh", DOMAIN), "fresh");

    services.krs.on_shutdown().unwrap();
    assert!(services.krs.list_keys().unwrap().is_empty());
}

#[test]
fn rotate_all_skips_disabled_and_in_progress_domains() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);

    let disabled = DekRecord {
        disabled: true,
        ..DekRecord::new("retired-domain")
    };
    services.store.save(&disabled).unwrap();

    let dek = fieldseal_crypto::generate_dek().unwrap();
    let stuck = DekRecord {
        current_key: Some(services.kes.wrap(&dek)),
        previous_key: Some(services.kes.wrap(&dek)),
        rotation_in_progress: true,
        ..DekRecord::new("stuck-domain")
    };
    services.store.save(&stuck).unwrap();

    let rotated_before = services.store.get(DOMAIN).unwrap().unwrap().last_rotation_time;
    services.krs.rotate_all().unwrap();

    // Active domain rotated again
    let rotated_after = services.store.get(DOMAIN).unwrap().unwrap().last_rotation_time;
    assert!(rotated_after >= rotated_before);
    assert!(rotated_after.is_some());
    // Disabled domain untouched
    let retired = services.store.get("retired-domain").unwrap().unwrap();
    assert!(retired.disabled && retired.current_key.is_none());
    // In-progress domain skipped, not completed, by the bulk entry point
    let stuck = services.store.get("stuck-domain").unwrap().unwrap();
    assert!(stuck.rotation_in_progress);
}

#[test]
fn rotation_schedule_validation() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));
    let services = boot(&config, &db_path(&dir));

    assert!(matches!(
        services.krs.set_rotation_schedule(true, None),
        Err(RotationError::Config(_))
    ));
    assert!(matches!(
        services.krs.set_rotation_schedule(true, Some(0)),
        Err(RotationError::Config(_))
    ));

    services.krs.set_rotation_schedule(true, Some(30)).unwrap();
    let metadata = services.store.get_or_create().unwrap();
    assert!(metadata.rotation_schedule_enabled);
    assert_eq!(metadata.rotation_period_days, Some(30));

    services.krs.set_rotation_schedule(false, None).unwrap();
    let metadata = services.store.get_or_create().unwrap();
    assert!(!metadata.rotation_schedule_enabled);
    assert!(metadata.rotation_period_days.is_none());
}

#[test]
fn tick_rotates_only_overdue_domains() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);

    // Not overdue: tick is a no-op even with the schedule on
    services.krs.set_rotation_schedule(true, Some(30)).unwrap();
    let fresh_time = services.store.get(DOMAIN).unwrap().unwrap().last_rotation_time;
    services.krs.tick().unwrap();
    assert_eq!(
        services.store.get(DOMAIN).unwrap().unwrap().last_rotation_time,
        fresh_time
    );

    // Backdate the last rotation past the period
    let mut record = services.store.get(DOMAIN).unwrap().unwrap();
    record.last_rotation_time = Some(Utc::now() - Duration::days(45));
    services.store.save(&record).unwrap();

    services.krs.tick().unwrap();
    let rotated = services.store.get(DOMAIN).unwrap().unwrap();
    assert!(rotated.last_rotation_time.unwrap() > Utc::now() - Duration::days(1));
    assert_eq!(services.des.decrypt(&stored_email(&services, 1), DOMAIN), EMAIL);
}

#[test]
fn tick_without_schedule_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let config = EncryptionConfig::with_keystore(provision_keystore(&dir, "kek.json", &random_key()));

    let services = boot(&config, &db_path(&dir));
    insert_customer(&services, 1, EMAIL);
    start(&services);

    let mut record = services.store.get(DOMAIN).unwrap().unwrap();
    record.last_rotation_time = Some(Utc::now() - Duration::days(400));
    services.store.save(&record).unwrap();

    services.krs.tick().unwrap();
    assert_eq!(
        services.store.get(DOMAIN).unwrap().unwrap().last_rotation_time,
        Some(record.last_rotation_time.unwrap())
    );
}
