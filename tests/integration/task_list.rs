//! Integration tests for the caller layer on a real storage file.
//!
//! Drives `TaskList` and the CLI commands end to end: duplicate
//! prevention, persistence across restarts, backup/restore and the
//! two-step clear-all.
//!
//! Verification command: `cargo test --test task_list`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};

use todomem::commands::{self, Command, confirm_clear_all};
use todomem::config::TodoConfig;
use todomem::tasks::{TaskError, TaskList};
use todomem_store::{Clock, ManualClock};

// =============================================================================
// Test helpers
// =============================================================================

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

/// Opens the list the same way the binary does.
fn open(path: &Path, clock: &ManualClock) -> TaskList {
    let config = TodoConfig {
        data_file: path.to_path_buf(),
        ..TodoConfig::default()
    };
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(config.open_store(Arc::clone(&clock)));
    TaskList::load(store, clock).with_max_text_len(config.max_text_len)
}

fn run(list: &mut TaskList, command: Command, input: &str) -> String {
    let mut out = Vec::new();
    commands::execute(command, list, &mut Cursor::new(input), &mut out).expect("command");
    String::from_utf8(out).unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn buy_milk_duplicate_never_reaches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let mut list = open(&path, &clock);
    let first = list.add("Buy milk", None).unwrap().clone();
    assert_eq!(first.created_at, "2024-01-01T00:00:00.000Z");

    let err = list.add("buy milk", None).unwrap_err();
    assert!(matches!(err, TaskError::Duplicate(_)));
    drop(list);

    let list = open(&path, &clock);
    assert_eq!(list.tasks(), &[first]);
}

#[test]
fn edits_and_due_dates_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let mut list = open(&path, &clock);
    list.add("draft report", None).unwrap();
    clock.advance(TimeDelta::seconds(5));
    list.add("send invoice", Some("2024-01-31")).unwrap();
    list.edit("1", "final report").unwrap();
    list.set_due("1", Some("2024-01-15T12:00:00Z")).unwrap();
    list.delete("2").unwrap();
    drop(list);

    let list = open(&path, &clock);
    assert_eq!(list.len(), 1);
    assert_eq!(list.tasks()[0].text, "final report");
    assert_eq!(
        list.tasks()[0].due_date.as_deref(),
        Some("2024-01-15T12:00:00Z")
    );
}

#[test]
fn restore_through_commands_and_undo() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let mut list = open(&dir.path().join("storage.json"), &clock);

    list.add("alpha", None).unwrap();
    run(&mut list, Command::Backup, "");
    clock.advance(TimeDelta::minutes(1));
    list.add("beta", None).unwrap();

    let backups = list.store().available_backups();
    let out = run(
        &mut list,
        Command::Restore {
            key: backups[0].key.clone(),
        },
        "",
    );
    assert!(out.contains("Restored 1 task(s)"));
    let texts: Vec<&str> = list.tasks().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["alpha"]);

    let listing = run(&mut list, Command::Backups, "");
    assert_eq!(listing.lines().count(), 2);
    assert!(listing.lines().next().unwrap().contains("pre-restore"));
}

#[test]
fn clear_all_needs_two_distinct_answers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();
    let mut list = open(&path, &clock);
    list.add("one", None).unwrap();
    run(&mut list, Command::Backup, "");

    let mut out = Vec::new();
    assert!(
        confirm_clear_all(&mut Cursor::new("yes\nyes\n"), &mut out)
            .unwrap()
            .is_none()
    );

    run(&mut list, Command::Clear, "y\ndelete everything\n");
    assert!(list.is_empty());
    assert!(list.store().available_backups().is_empty());
    drop(list);

    let list = open(&path, &clock);
    assert!(list.is_empty());
}

#[test]
fn shell_session_persists_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let clock = clock();

    let mut list = open(&path, &clock);
    let script = "add Water the plants --due 2024-01-03\nadd Walk the dog\ndelete 2 --yes\nexit\n";
    let mut out = Vec::new();
    commands::run_shell(&mut list, &mut Cursor::new(script), &mut out).unwrap();
    drop(list);

    let list = open(&path, &clock);
    assert_eq!(list.len(), 1);
    assert_eq!(list.tasks()[0].text, "Water the plants");
    assert_eq!(list.tasks()[0].due_date.as_deref(), Some("2024-01-03"));
}
