//! Integration tests for saving and loading the task collection.
//!
//! Exercises the store on a real storage file: order preservation,
//! sanitization of stored records, recovery from corrupt data, version
//! stamping across reopen, and the last-saved marker.
//!
//! Verification command: `cargo test --test persistence`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;

use todomem_proto::{BackupReason, SCHEMA_VERSION, Task, keys};
use todomem_store::{
    FileSubstrate, LoadIssue, ManualClock, MigrationOutcome, StorageKind, Substrate, TaskStore,
};

// =============================================================================
// Test helpers
// =============================================================================

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 10, 30, 0).unwrap())
}

fn open_store(path: &Path, clock: &ManualClock) -> TaskStore {
    let substrate = FileSubstrate::open(path).expect("open storage file");
    TaskStore::open(Box::new(substrate), Arc::new(clock.clone()))
}

/// Writes raw values into the storage file before any store opens it.
fn seed(path: &Path, entries: &[(&str, &str)]) {
    let substrate = FileSubstrate::open(path).expect("open storage file");
    for (key, value) in entries {
        substrate.set(key, value).expect("seed storage");
    }
}

fn task(id: &str, text: &str, due: Option<&str>) -> Task {
    Task {
        id: id.to_string(),
        text: text.to_string(),
        created_at: "2024-01-01T00:00:00Z".to_string(),
        due_date: due.map(str::to_string),
    }
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn buy_milk_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let store = open_store(&path, &clock);
    assert!(store.is_durable());
    store
        .save_value(&json!([
            {"id": "1", "text": "Buy milk", "createdAt": "2024-01-01T00:00:00Z", "dueDate": null}
        ]))
        .unwrap();
    drop(store);

    let store = open_store(&path, &clock);
    assert_eq!(store.load(), vec![task("1", "Buy milk", None)]);
}

#[test]
fn order_and_due_dates_are_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();
    let tasks = vec![
        task("c", "third added, shown first", Some("2024-02-01")),
        task("a", "first added", None),
        task("b", "second added", Some("2024-01-15T09:00:00.000Z")),
    ];

    open_store(&path, &clock).save(&tasks).unwrap();
    assert_eq!(open_store(&path, &clock).load(), tasks);
}

#[test]
fn record_missing_text_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("storage.json"), &clock());

    let receipt = store
        .save_value(&json!([
            {"id": "1", "text": "valid", "createdAt": "2024-01-01T00:00:00Z"},
            {"id": "2", "createdAt": "2024-01-01T00:00:00Z"}
        ]))
        .unwrap();
    assert_eq!(receipt.dropped, 1);
    assert_eq!(store.load(), vec![task("1", "valid", None)]);
}

#[test]
fn stored_records_are_sanitized_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    // Written by hand, as an older version might have.
    seed(
        &path,
        &[(
            keys::TASKS,
            r#"[
                {"id":"  7 ","text":"  trim me  ","createdAt":1704067200000,"dueDate":"not a date"},
                {"id":"","text":"no id","createdAt":"2024-01-01"},
                {"id":"8","text":"bad date","createdAt":"yesterday"},
                42
            ]"#,
        )],
    );
    let store = open_store(&path, &clock());

    let report = store.load_report();
    assert_eq!(report.dropped, 3);
    assert_eq!(report.issue, None);
    assert_eq!(
        report.tasks,
        vec![Task {
            id: "7".to_string(),
            text: "trim me".to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            due_date: None,
        }]
    );
}

// =============================================================================
// Corrupt data
// =============================================================================

#[test]
fn corrupt_collection_loads_empty_and_is_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    seed(&path, &[(keys::TASKS, "not json at all")]);
    let store = open_store(&path, &clock());

    let report = store.load_report();
    assert!(report.tasks.is_empty());
    assert!(matches!(report.issue, Some(LoadIssue::Recovered { backup: Some(_), .. })));

    let backups = store.available_backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].reason, BackupReason::ErrorRecovery);
}

#[test]
fn corrupt_storage_file_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    std::fs::write(&path, "garbage").unwrap();

    assert!(FileSubstrate::open(&path).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "garbage");
}

// =============================================================================
// Versioning and markers
// =============================================================================

#[test]
fn version_is_stamped_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    open_store(&path, &clock);
    let store = open_store(&path, &clock);
    assert_eq!(
        store.check_version_and_migrate().unwrap(),
        MigrationOutcome::UpToDate
    );
    assert!(store.available_backups().is_empty());
}

#[test]
fn older_version_is_backed_up_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    seed(
        &path,
        &[
            (keys::APP_VERSION, "0.1.0"),
            (keys::TASKS, r#"[{"id":"1","text":"legacy","createdAt":"2023-06-01"}]"#),
        ],
    );

    let store = open_store(&path, &clock());
    let backups = store.available_backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].reason, BackupReason::VersionMigration);
    assert_eq!(backups[0].task_count, 1);
    assert_eq!(store.memory_stats().version.as_deref(), Some(SCHEMA_VERSION));
}

#[test]
fn last_saved_follows_the_clock() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let store = open_store(&dir.path().join("storage.json"), &clock);

    store.save(&[task("1", "a", None)]).unwrap();
    clock.advance(TimeDelta::minutes(90));
    store.save(&[task("1", "a", None)]).unwrap();

    let stats = store.memory_stats();
    assert_eq!(stats.kind, StorageKind::Primary);
    assert_eq!(stats.last_saved.as_deref(), Some("2024-01-02T12:00:00.000Z"));
}
