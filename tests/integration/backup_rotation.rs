//! Integration tests for backup creation, rotation, restore and wipe.
//!
//! Runs against a real storage file so every backup round-trips through
//! disk between steps.
//!
//! Verification command: `cargo test --test backup_rotation`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};

use todomem_proto::{BackupReason, MAX_BACKUP_ITEMS, Task, keys};
use todomem_store::{
    ClearAllRequest, FileSubstrate, ManualClock, StoreError, Substrate, TaskStore,
    spawn_auto_backup,
};

// =============================================================================
// Test helpers
// =============================================================================

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 10, 7, 0, 0).unwrap())
}

fn open_store(path: &Path, clock: &ManualClock) -> TaskStore {
    let substrate = FileSubstrate::open(path).expect("open storage file");
    TaskStore::open(Box::new(substrate), Arc::new(clock.clone()))
}

fn tasks(texts: &[&str]) -> Vec<Task> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Task {
            id: format!("id-{i}"),
            text: (*text).to_string(),
            created_at: "2024-04-01T00:00:00.000Z".to_string(),
            due_date: None,
        })
        .collect()
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn only_newest_backups_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let store = open_store(&dir.path().join("storage.json"), &clock);
    store.save(&tasks(&["one"])).unwrap();

    let mut keys = Vec::new();
    for _ in 0..MAX_BACKUP_ITEMS + 3 {
        keys.push(store.create_backup(BackupReason::Manual).unwrap().to_string());
        clock.advance(TimeDelta::minutes(10));
    }

    let listed = store.available_backups();
    assert_eq!(listed.len(), MAX_BACKUP_ITEMS);
    let listed_keys: Vec<&str> = listed.iter().map(|b| b.key.as_str()).collect();
    let newest: Vec<&str> = keys.iter().rev().take(MAX_BACKUP_ITEMS).map(String::as_str).collect();
    assert_eq!(listed_keys, newest);

    let instants: Vec<_> = listed.iter().map(|b| b.instant().unwrap()).collect();
    assert!(instants.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn custom_retention_cap_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let substrate = FileSubstrate::open(dir.path().join("storage.json")).unwrap();
    let store = TaskStore::open_with_max_backups(Box::new(substrate), Arc::new(clock.clone()), 2);

    for _ in 0..4 {
        store.create_backup(BackupReason::Auto).unwrap();
        clock.advance(TimeDelta::seconds(30));
    }
    assert_eq!(store.available_backups().len(), 2);
}

#[test]
fn backups_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let store = open_store(&path, &clock);
    store.save(&tasks(&["persisted"])).unwrap();
    let key = store.create_backup(BackupReason::Manual).unwrap();
    drop(store);

    let store = open_store(&path, &clock);
    let listed = store.available_backups();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, key.to_string());
    assert_eq!(listed[0].task_count, 1);
}

// =============================================================================
// Restore
// =============================================================================

#[test]
fn restore_brings_back_old_state_with_safety_net() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let store = open_store(&dir.path().join("storage.json"), &clock);

    let before = tasks(&["Buy milk", "Call mum"]);
    store.save(&before).unwrap();
    let key = store.create_backup(BackupReason::Manual).unwrap();

    clock.advance(TimeDelta::hours(1));
    store.save(&tasks(&["Only this now"])).unwrap();

    let receipt = store.restore_from_backup(&key.to_string()).unwrap();
    assert_eq!(receipt.restored, 2);
    assert_eq!(store.load(), before);

    let listed = store.available_backups();
    assert_eq!(listed[0].key, receipt.safety_backup.to_string());
    assert_eq!(listed[0].reason, BackupReason::PreRestore);
    assert_eq!(listed[0].task_count, 1);

    // Undo the restore through the safety backup.
    store
        .restore_from_backup(&receipt.safety_backup.to_string())
        .unwrap();
    assert_eq!(store.load(), tasks(&["Only this now"]));
}

#[test]
fn restore_of_unknown_key_leaves_tasks_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("storage.json"), &clock());
    let current = tasks(&["keep me"]);
    store.save(&current).unwrap();

    let err = store.restore_from_backup("todo-backup-1").unwrap_err();
    assert!(matches!(err, StoreError::BackupNotFound(_)));
    assert_eq!(store.load(), current);
    assert!(store.available_backups().is_empty());
}

#[test]
fn restore_under_single_backup_cap_keeps_safety_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();
    let substrate = FileSubstrate::open(&path).unwrap();
    let store = TaskStore::open_with_max_backups(Box::new(substrate), Arc::new(clock.clone()), 0);

    store.save(&tasks(&["from backup"])).unwrap();
    let key = store.create_backup(BackupReason::Manual).unwrap();
    clock.advance(TimeDelta::minutes(1));
    store.save(&tasks(&["current"])).unwrap();

    let receipt = store.restore_from_backup(&key.to_string()).unwrap();
    drop(store);

    let store = open_store(&path, &clock);
    assert_eq!(store.load(), tasks(&["from backup"]));
    store
        .restore_from_backup(&receipt.safety_backup.to_string())
        .unwrap();
    assert_eq!(store.load(), tasks(&["current"]));
}

// =============================================================================
// Corrupt collection
// =============================================================================

#[test]
fn repeated_loads_of_corrupt_data_keep_earlier_backups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let store = open_store(&path, &clock);
    store.save(&tasks(&["precious"])).unwrap();
    let mut manual = Vec::new();
    for _ in 0..MAX_BACKUP_ITEMS {
        manual.push(store.create_backup(BackupReason::Manual).unwrap().to_string());
        clock.advance(TimeDelta::minutes(1));
    }
    drop(store);
    FileSubstrate::open(&path)
        .unwrap()
        .set(keys::TASKS, "[{truncated")
        .unwrap();

    // Every CLI invocation reopens and loads; `stats` loads too.
    for _ in 0..MAX_BACKUP_ITEMS + 2 {
        let store = open_store(&path, &clock);
        assert!(store.load().is_empty());
        store.memory_stats();
        clock.advance(TimeDelta::minutes(1));
    }

    let store = open_store(&path, &clock);
    let listed = store.available_backups();
    assert_eq!(listed.len(), MAX_BACKUP_ITEMS);
    assert_eq!(listed[0].reason, BackupReason::ErrorRecovery);
    let survivors: Vec<&str> = listed[1..].iter().map(|b| b.key.as_str()).collect();
    let newest_manual: Vec<&str> = manual
        .iter()
        .rev()
        .take(MAX_BACKUP_ITEMS - 1)
        .map(String::as_str)
        .collect();
    assert_eq!(survivors, newest_manual);

    let oldest_survivor = listed.last().unwrap().key.clone();
    store.restore_from_backup(&oldest_survivor).unwrap();
    assert_eq!(store.load(), tasks(&["precious"]));
}

// =============================================================================
// Clear all
// =============================================================================

#[test]
fn clear_all_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();
    let store = open_store(&path, &clock);

    store.save(&tasks(&["a", "b"])).unwrap();
    for _ in 0..3 {
        store.create_backup(BackupReason::Manual).unwrap();
        clock.advance(TimeDelta::minutes(1));
    }

    let authorization = ClearAllRequest::new().acknowledge().confirm();
    assert!(store.clear_all_data(authorization).unwrap() > 0);
    assert!(store.load().is_empty());
    assert!(store.available_backups().is_empty());
    drop(store);

    let reopened = FileSubstrate::open(&path).unwrap();
    let leftover = reopened.keys().unwrap();
    assert!(leftover.is_empty(), "left behind: {leftover:?}");
}

// =============================================================================
// Automatic backups
// =============================================================================

#[tokio::test(start_paused = true)]
async fn auto_backup_runs_hourly_only_after_changes() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let store = Arc::new(open_store(&dir.path().join("storage.json"), &clock));
    store.save(&tasks(&["first"])).unwrap();
    clock.advance(TimeDelta::seconds(1));

    let hour = std::time::Duration::from_secs(3600);
    let handle = spawn_auto_backup(Arc::clone(&store), hour);

    tokio::time::sleep(hour + std::time::Duration::from_secs(1)).await;
    assert_eq!(store.available_backups().len(), 1);

    // Nothing saved since: the next tick is a no-op.
    clock.advance(TimeDelta::hours(1));
    tokio::time::sleep(hour).await;
    assert_eq!(store.available_backups().len(), 1);

    clock.advance(TimeDelta::minutes(5));
    store.save(&tasks(&["first", "second"])).unwrap();
    clock.advance(TimeDelta::minutes(5));
    tokio::time::sleep(hour).await;

    let listed = store.available_backups();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].reason, BackupReason::Auto);
    assert_eq!(listed[0].task_count, 2);

    handle.abort();
}
