//! Loading, saving and versioning of the persisted task collection.
//!
//! Every read and write goes through record-level validation: invalid
//! records are dropped, valid ones are sanitized, and nothing malformed in
//! storage ever surfaces as a panic or an error from [`TaskStore::load`].

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::Serialize;
use serde_json::Value;

use todomem_proto::keys;
use todomem_proto::{BackupReason, MAX_BACKUP_ITEMS, SCHEMA_VERSION, Task, format_instant};

use crate::clock::Clock;
use crate::substrate::{Backend, MemorySubstrate, Substrate, SubstrateError};

/// Errors returned by task store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `save` was handed something other than a list of records.
    #[error("tasks must be a sequence")]
    NotASequence,

    /// The substrate failed.
    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The write does not fit even after evicting backups.
    #[error("not enough storage space for {needed} bytes, even after evicting backups")]
    CapacityExhausted {
        /// Size of the payload that did not fit.
        needed: usize,
    },

    /// No backup exists under the given key.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// The backup payload is corrupt or has no task list.
    #[error("backup is corrupt or has no task list: {0}")]
    InvalidBackup(String),

    /// The store is running on volatile storage.
    #[error("backups are unavailable on volatile storage")]
    BackupsUnavailable,

    /// The safety backup that must precede an operation could not be taken.
    #[error("safety backup failed, {operation} aborted: {source}")]
    SafetyBackupFailed {
        /// Operation that was aborted.
        operation: &'static str,
        /// Why the backup failed.
        source: Box<StoreError>,
    },
}

/// Why a load came back with less than the stored content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadIssue {
    /// The stored value parsed but was not a list.
    NotASequence,
    /// Reading or parsing failed; an error-recovery backup was attempted.
    Recovered {
        /// Description of the fault.
        error: String,
        /// Key of the error-recovery backup, if one was written.
        backup: Option<String>,
    },
}

/// Result of [`TaskStore::load_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Valid, sanitized tasks in stored order.
    pub tasks: Vec<Task>,
    /// Number of stored records dropped as invalid.
    pub dropped: usize,
    /// Set when the stored collection could not be used as-is.
    pub issue: Option<LoadIssue>,
}

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Number of tasks written.
    pub saved: usize,
    /// Number of input records dropped as invalid.
    pub dropped: usize,
}

/// Outcome of [`TaskStore::check_version_and_migrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No version marker existed; the current one was stamped.
    FreshInstall,
    /// The stored version already matches.
    UpToDate,
    /// A different version was found, backed up and re-stamped.
    Migrated {
        /// Version found in storage.
        from: String,
    },
}

/// Which storage the statistics describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Durable storage.
    Primary,
    /// Volatile in-memory fallback.
    Fallback,
    /// Statistics could not be gathered.
    Error,
}

/// Snapshot of storage usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Storage kind.
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Number of valid stored tasks.
    pub tasks: usize,
    /// Number of readable backups.
    pub backups: usize,
    /// Approximate size of everything in the substrate, e.g. `"12KB"`.
    pub space: String,
    /// Instant of the last successful save.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<String>,
    /// Stored schema version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Why gathering failed, for [`StorageKind::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistence component owning the task, version, backup and last-saved
/// keys of its substrate.
///
/// All public operations run to completion under a reentrant lock, so a
/// timer-driven backup cannot interleave with a save from another task.
pub struct TaskStore {
    pub(crate) backend: Backend,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) max_backups: usize,
    pub(crate) op_lock: ReentrantMutex<()>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("backend", &self.backend)
            .field("max_backups", &self.max_backups)
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    /// Opens a store on `substrate`, keeping the default backup cap.
    ///
    /// See [`open_with_max_backups`](Self::open_with_max_backups).
    #[must_use]
    pub fn open(substrate: Box<dyn Substrate>, clock: Arc<dyn Clock>) -> Self {
        Self::open_with_max_backups(substrate, clock, MAX_BACKUP_ITEMS)
    }

    /// Opens a store on `substrate`, retaining at most `max_backups`.
    ///
    /// A cap of zero is raised to one so a restore always keeps its
    /// pre-restore backup.
    ///
    /// The substrate is probed once with a scratch write. If the probe
    /// fails, the store falls back to volatile memory for its whole
    /// lifetime. On durable storage the schema version is checked and
    /// stamped (see [`check_version_and_migrate`](Self::check_version_and_migrate)).
    #[must_use]
    pub fn open_with_max_backups(
        substrate: Box<dyn Substrate>,
        clock: Arc<dyn Clock>,
        max_backups: usize,
    ) -> Self {
        let backend =
            match substrate.probe(keys::AVAILABILITY_PROBE, keys::AVAILABILITY_PROBE) {
                Ok(()) => Backend::Durable(substrate),
                Err(err) => {
                    tracing::warn!(error = %err, "storage unavailable, using in-memory fallback");
                    Backend::Volatile(MemorySubstrate::new())
                }
            };

        let store = Self::with_backend(backend, clock, max_backups.max(1));
        if store.backend.is_durable() {
            if let Err(err) = store.check_version_and_migrate() {
                tracing::error!(error = %err, "version check failed");
            }
        }
        store
    }

    /// Creates a store on volatile memory, without probing or versioning.
    #[must_use]
    pub fn volatile(clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(
            Backend::Volatile(MemorySubstrate::new()),
            clock,
            MAX_BACKUP_ITEMS,
        )
    }

    fn with_backend(backend: Backend, clock: Arc<dyn Clock>, max_backups: usize) -> Self {
        Self {
            backend,
            clock,
            max_backups,
            op_lock: ReentrantMutex::new(()),
        }
    }

    /// Returns `true` when running on durable storage.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.backend.is_durable()
    }

    /// Maximum number of backups retained.
    #[must_use]
    pub const fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub(crate) fn substrate(&self) -> &dyn Substrate {
        self.backend.substrate()
    }

    /// Loads the task collection, returning only the tasks.
    ///
    /// Never fails; see [`load_report`](Self::load_report).
    #[must_use]
    pub fn load(&self) -> Vec<Task> {
        self.load_report().tasks
    }

    /// Loads the task collection with diagnostics.
    ///
    /// Absent data yields an empty list. A stored value that is not a list
    /// yields an empty list with [`LoadIssue::NotASequence`]. Invalid
    /// records are dropped and counted. If the stored data cannot be read
    /// or parsed, an error-recovery backup is attempted and the result is
    /// empty with [`LoadIssue::Recovered`]. Repeated loads of the same
    /// unreadable payload reuse the newest error-recovery backup instead of
    /// rotating older backups out.
    #[must_use]
    pub fn load_report(&self) -> LoadReport {
        let _guard = self.op_lock.lock();
        match self.read_persisted() {
            Ok(report) => report,
            Err(err) => {
                let backup = if let Some(existing) = self.existing_recovery_backup() {
                    tracing::warn!(error = %err, key = %existing, "failed to load tasks, already snapshotted");
                    Some(existing.to_string())
                } else {
                    tracing::error!(error = %err, "failed to load tasks, taking error-recovery backup");
                    match self.create_backup(BackupReason::ErrorRecovery) {
                        Ok(key) => Some(key.to_string()),
                        Err(backup_err) => {
                            tracing::warn!(error = %backup_err, "error-recovery backup failed");
                            None
                        }
                    }
                };
                LoadReport {
                    tasks: Vec::new(),
                    dropped: 0,
                    issue: Some(LoadIssue::Recovered {
                        error: err.to_string(),
                        backup,
                    }),
                }
            }
        }
    }

    /// Reads the persisted collection without any recovery side effects.
    pub(crate) fn read_persisted(&self) -> Result<LoadReport, StoreError> {
        let Some(json) = self.substrate().get(keys::TASKS)? else {
            return Ok(LoadReport::default());
        };
        if json.is_empty() {
            return Ok(LoadReport::default());
        }

        let value: Value = serde_json::from_str(&json)?;
        let Value::Array(records) = value else {
            tracing::warn!("stored task data is not a list, starting empty");
            return Ok(LoadReport {
                issue: Some(LoadIssue::NotASequence),
                ..LoadReport::default()
            });
        };

        let (tasks, dropped) = self.sanitize_all(&records);
        Ok(LoadReport {
            tasks,
            dropped,
            issue: None,
        })
    }

    fn sanitize_all(&self, records: &[Value]) -> (Vec<Task>, usize) {
        let now = self.clock.now();
        let tasks: Vec<Task> = records
            .iter()
            .filter_map(|record| Task::from_record(record, now))
            .collect();
        let dropped = records.len() - tasks.len();
        if dropped > 0 {
            tracing::warn!(dropped, "dropped invalid task records");
        }
        (tasks, dropped)
    }

    /// Saves a typed task collection.
    ///
    /// Tasks are validated and sanitized exactly like stored records, so
    /// invalid entries are dropped rather than persisted.
    ///
    /// # Errors
    ///
    /// See [`save_value`](Self::save_value).
    pub fn save(&self, tasks: &[Task]) -> Result<SaveReceipt, StoreError> {
        let records = serde_json::to_value(tasks)?;
        self.save_value(&records)
    }

    /// Saves an untyped collection of task records.
    ///
    /// Before writing, the payload is probed against the substrate's
    /// capacity. If it does not fit, old backups are evicted (oldest first)
    /// and the real write is attempted once. On success the last-saved
    /// marker is updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotASequence`] if `value` is not a list,
    /// [`StoreError::CapacityExhausted`] if the payload still does not fit,
    /// or [`StoreError::Substrate`] for other write failures.
    pub fn save_value(&self, value: &Value) -> Result<SaveReceipt, StoreError> {
        let _guard = self.op_lock.lock();
        let Value::Array(records) = value else {
            tracing::error!("refusing to save tasks: input is not a list");
            return Err(StoreError::NotASequence);
        };

        let (tasks, dropped) = self.sanitize_all(records);
        let payload = serde_json::to_string(&tasks)?;

        if self.backend.is_durable() {
            if let Err(err) = self.substrate().probe(keys::SPACE_PROBE, &payload) {
                tracing::warn!(
                    error = %err,
                    bytes = payload.len(),
                    "insufficient storage space, evicting old backups"
                );
                self.make_room(&payload);
            }
        }

        self.substrate()
            .set(keys::TASKS, &payload)
            .map_err(|err| {
                if err.is_quota() {
                    StoreError::CapacityExhausted {
                        needed: payload.len(),
                    }
                } else {
                    err.into()
                }
            })?;

        let saved_at = format_instant(self.clock.now());
        if let Err(err) = self.substrate().set(keys::LAST_SAVED, &saved_at) {
            tracing::warn!(error = %err, "tasks saved but last-saved marker was not updated");
        }

        tracing::debug!(saved = tasks.len(), dropped, "tasks saved");
        Ok(SaveReceipt {
            saved: tasks.len(),
            dropped,
        })
    }

    /// Evicts backups until `payload` passes the space probe or none remain.
    fn make_room(&self, payload: &str) {
        self.clean_old_backups();
        let mut backups = self.available_backups();
        while self.substrate().probe(keys::SPACE_PROBE, payload).is_err() {
            let Some(oldest) = backups.pop() else {
                break;
            };
            match self.substrate().remove(&oldest.key) {
                Ok(()) => tracing::info!(key = %oldest.key, "evicted backup to free space"),
                Err(err) => {
                    tracing::warn!(key = %oldest.key, error = %err, "failed to evict backup");
                    break;
                }
            }
        }
    }

    /// Stamps the schema version, backing up first when it changes.
    ///
    /// Field-level migrations, when needed, belong between the backup and
    /// the stamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SafetyBackupFailed`] if a version change is
    /// detected but the backup cannot be taken (the old version stays
    /// stamped so the migration is retried next time), or
    /// [`StoreError::Substrate`] if the marker cannot be read or written.
    pub fn check_version_and_migrate(&self) -> Result<MigrationOutcome, StoreError> {
        let _guard = self.op_lock.lock();
        let Some(stored) = self.substrate().get(keys::APP_VERSION)? else {
            self.substrate().set(keys::APP_VERSION, SCHEMA_VERSION)?;
            tracing::info!(version = SCHEMA_VERSION, "fresh install, version stamped");
            return Ok(MigrationOutcome::FreshInstall);
        };

        if stored == SCHEMA_VERSION {
            return Ok(MigrationOutcome::UpToDate);
        }

        tracing::info!(from = %stored, to = SCHEMA_VERSION, "migrating stored data");
        if self.backend.is_durable() {
            self.create_backup(BackupReason::VersionMigration)
                .map_err(|source| StoreError::SafetyBackupFailed {
                    operation: "version migration",
                    source: Box::new(source),
                })?;
        }
        self.substrate().set(keys::APP_VERSION, SCHEMA_VERSION)?;
        Ok(MigrationOutcome::Migrated { from: stored })
    }

    /// Gathers usage statistics. Never fails; faults are reported as
    /// [`StorageKind::Error`]. Read-only: an unreadable collection counts
    /// as zero tasks and no backup is taken.
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        let _guard = self.op_lock.lock();
        if !self.backend.is_durable() {
            return MemoryStats {
                kind: StorageKind::Fallback,
                tasks: self.stored_task_count(),
                backups: 0,
                space: "N/A".to_string(),
                last_saved: None,
                version: None,
                error: None,
            };
        }

        match self.try_stats() {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(error = %err, "failed to gather storage statistics");
                MemoryStats {
                    kind: StorageKind::Error,
                    tasks: 0,
                    backups: 0,
                    space: "N/A".to_string(),
                    last_saved: None,
                    version: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Valid tasks currently stored, without the recovery side effects of
    /// [`load`](Self::load).
    fn stored_task_count(&self) -> usize {
        self.read_persisted().map_or(0, |report| report.tasks.len())
    }

    fn try_stats(&self) -> Result<MemoryStats, StoreError> {
        let substrate = self.substrate();
        let mut total = 0usize;
        for key in substrate.keys()? {
            if let Some(value) = substrate.get(&key)? {
                total += key.len() + value.len();
            }
        }

        Ok(MemoryStats {
            kind: StorageKind::Primary,
            tasks: self.stored_task_count(),
            backups: self.available_backups().len(),
            space: format!("{}KB", (total + 512) / 1024),
            last_saved: substrate.get(keys::LAST_SAVED)?,
            version: substrate.get(keys::APP_VERSION)?,
            error: None,
        })
    }
}
