//! Key namespace owned by the task store inside the substrate.
//!
//! The store never reads or writes keys outside this namespace, with the
//! single exception of the space estimate, which enumerates everything.

/// Serialized task collection.
pub const TASKS: &str = "todo-tasks";
/// Schema version marker.
pub const APP_VERSION: &str = "todo-app-version";
/// Key of the most recently created backup.
pub const LAST_BACKUP: &str = "todo-last-backup";
/// Reserved for caller preferences; wiped together with everything else.
pub const USER_SETTINGS: &str = "todo-user-settings";
/// ISO-8601 instant of the last successful save.
pub const LAST_SAVED: &str = "todo-last-saved";
/// Prefix shared by every backup entry.
pub const BACKUP_PREFIX: &str = "todo-backup-";

/// Scratch key used once at startup to detect whether the substrate works.
pub const AVAILABILITY_PROBE: &str = "__todomem_probe__";
/// Scratch key used to test whether a payload fits before the real write.
pub const SPACE_PROBE: &str = "__space_test__";

/// Fixed (non-backup) keys removed by a full wipe.
pub const OWNED: [&str; 5] = [TASKS, APP_VERSION, LAST_BACKUP, USER_SETTINGS, LAST_SAVED];

/// Returns `true` if `key` names a backup entry.
#[must_use]
pub fn is_backup_key(key: &str) -> bool {
    key.starts_with(BACKUP_PREFIX)
}
