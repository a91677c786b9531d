//! Backup records, their keys and the summaries shown when listing them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::BACKUP_PREFIX;
use crate::task::{Task, parse_instant};

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    /// Requested explicitly by the user.
    Manual,
    /// Taken by the periodic timer.
    Auto,
    /// Taken after the persisted collection could not be read.
    ErrorRecovery,
    /// Taken before stamping a new schema version.
    VersionMigration,
    /// Taken before a restore overwrote the live collection.
    PreRestore,
    /// Taken right before a full wipe.
    ClearAll,
    /// A reason this build does not know (written by another version).
    #[serde(other)]
    Unknown,
}

impl fmt::Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::ErrorRecovery => "error-recovery",
            Self::VersionMigration => "version-migration",
            Self::PreRestore => "pre-restore",
            Self::ClearAll => "clear-all",
            Self::Unknown => "unknown",
        };
        f.pad(s)
    }
}

/// Identifier of a backup entry: `todo-backup-<millis>[-<seq>]`.
///
/// `seq` disambiguates backups created within the same millisecond.
/// Keys order by creation time, then by `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupKey {
    millis: u64,
    seq: u32,
}

impl BackupKey {
    /// Builds a key from raw parts.
    #[must_use]
    pub const fn new(millis: u64, seq: u32) -> Self {
        Self { millis, seq }
    }

    /// The first candidate key for a backup created at `at`.
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::new(u64::try_from(at.timestamp_millis()).unwrap_or(0), 0)
    }

    /// The next candidate key for the same millisecond.
    #[must_use]
    pub const fn next(self) -> Self {
        Self::new(self.millis, self.seq.saturating_add(1))
    }

    /// Milliseconds since the Unix epoch encoded in the key.
    #[must_use]
    pub const fn millis(&self) -> u64 {
        self.millis
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seq == 0 {
            write!(f, "{BACKUP_PREFIX}{}", self.millis)
        } else {
            write!(f, "{BACKUP_PREFIX}{}-{}", self.millis, self.seq)
        }
    }
}

/// Error returned when a string is not a well-formed backup key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a backup key: {0}")]
pub struct ParseBackupKeyError(String);

impl FromStr for BackupKey {
    type Err = ParseBackupKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBackupKeyError(s.to_string());
        let rest = s.strip_prefix(BACKUP_PREFIX).ok_or_else(err)?;
        let (millis, seq) = match rest.split_once('-') {
            Some((millis, seq)) => (millis, seq.parse().map_err(|_| err())?),
            None => (rest, 0),
        };
        let millis = millis.parse().map_err(|_| err())?;
        Ok(Self::new(millis, seq))
    }
}

/// A stored snapshot of the task collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Tasks as persisted when the snapshot was taken.
    pub tasks: Vec<Task>,
    /// ISO-8601 instant the snapshot was taken.
    pub timestamp: String,
    /// Why the snapshot was taken.
    pub reason: BackupReason,
    /// Schema version at snapshot time.
    pub version: String,
    /// Unparsable collection payload, kept verbatim by error-recovery
    /// snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Listing entry for one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    /// Substrate key of the backup.
    pub key: String,
    /// ISO-8601 instant the backup was taken (empty if missing).
    pub timestamp: String,
    /// Recorded reason.
    pub reason: BackupReason,
    /// Number of tasks in the snapshot.
    pub task_count: usize,
}

impl BackupSummary {
    /// Summarizes a stored backup payload.
    ///
    /// Returns `None` if the payload is not a JSON object; such entries are
    /// treated as corrupt and left out of listings.
    #[must_use]
    pub fn from_payload(key: &str, payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let obj = value.as_object()?;

        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reason = obj
            .get("reason")
            .cloned()
            .and_then(|r| serde_json::from_value(r).ok())
            .unwrap_or(BackupReason::Unknown);
        let task_count = obj
            .get("tasks")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        Some(Self {
            key: key.to_string(),
            timestamp,
            reason,
            task_count,
        })
    }

    /// Parsed timestamp, if valid.
    #[must_use]
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.timestamp)
    }

    /// Newest-first ordering: by timestamp, then by key. Entries without a
    /// valid timestamp sort after all dated ones.
    #[must_use]
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        let key_a = a.key.parse::<BackupKey>().ok();
        let key_b = b.key.parse::<BackupKey>().ok();
        (b.instant(), key_b, &b.key).cmp(&(a.instant(), key_a, &a.key))
    }
}
