//! Backup creation, listing, restore, rotation and the full wipe.
//!
//! Backups live next to the task collection in the same substrate, one key
//! per snapshot (`todo-backup-<millis>`). They are only available on durable
//! storage; on the volatile fallback every backup operation reports
//! [`StoreError::BackupsUnavailable`].

use serde_json::Value;

use todomem_proto::keys;
use todomem_proto::{Backup, BackupKey, BackupReason, BackupSummary, SCHEMA_VERSION, format_instant};

use crate::store::{StoreError, TaskStore};

/// First step of the clear-all confirmation sequence.
///
/// Wiping everything needs two distinct confirmations from the user.
/// Each step consumes the previous one, and only the final
/// [`ClearAllAuthorization`] is accepted by [`TaskStore::clear_all_data`].
#[derive(Debug, Default)]
pub struct ClearAllRequest {
    _private: (),
}

/// The user acknowledged that all tasks and backups will be lost.
#[derive(Debug)]
pub struct ClearAllAcknowledged {
    _private: (),
}

/// The user confirmed a second time; the wipe may proceed.
#[derive(Debug)]
pub struct ClearAllAuthorization {
    _private: (),
}

impl ClearAllRequest {
    /// Starts a confirmation sequence.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Records the first confirmation.
    #[must_use]
    pub const fn acknowledge(self) -> ClearAllAcknowledged {
        ClearAllAcknowledged { _private: () }
    }
}

impl ClearAllAcknowledged {
    /// Records the second, final confirmation.
    #[must_use]
    pub const fn confirm(self) -> ClearAllAuthorization {
        ClearAllAuthorization { _private: () }
    }
}

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReceipt {
    /// Number of tasks now live.
    pub restored: usize,
    /// Number of backup records dropped as invalid.
    pub dropped: usize,
    /// The pre-restore backup holding the state that was replaced.
    pub safety_backup: BackupKey,
}

impl TaskStore {
    /// Snapshots the currently persisted collection.
    ///
    /// The snapshot is written under a fresh key, the most-recent-backup
    /// pointer is updated, and rotation runs. If the persisted collection
    /// cannot be read, the snapshot is empty and keeps the raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackupsUnavailable`] on volatile storage, or
    /// [`StoreError::Substrate`] if the snapshot cannot be written.
    pub fn create_backup(&self, reason: BackupReason) -> Result<BackupKey, StoreError> {
        let _guard = self.op_lock.lock();
        if !self.backend.is_durable() {
            return Err(StoreError::BackupsUnavailable);
        }

        let (tasks, raw) = match self.read_persisted() {
            Ok(report) => (report.tasks, None),
            Err(err) => {
                tracing::debug!(error = %err, "snapshotting unreadable collection verbatim");
                (Vec::new(), self.substrate().get(keys::TASKS).ok().flatten())
            }
        };

        let now = self.clock.now();
        let backup = Backup {
            tasks,
            timestamp: format_instant(now),
            reason,
            version: SCHEMA_VERSION.to_string(),
            raw,
        };
        let payload = serde_json::to_string(&backup)?;

        let mut key = BackupKey::at(now);
        while self.substrate().get(&key.to_string())?.is_some() {
            key = key.next();
        }

        let key_str = key.to_string();
        if let Err(err) = self.substrate().set(&key_str, &payload) {
            tracing::warn!(%reason, error = %err, "failed to write backup");
            return Err(err.into());
        }
        self.substrate().set(keys::LAST_BACKUP, &key_str)?;
        tracing::info!(key = %key_str, %reason, tasks = backup.tasks.len(), "backup created");

        self.clean_old_backups();
        Ok(key)
    }

    /// Lists readable backups, newest first.
    ///
    /// Backups whose payload cannot be parsed are skipped. Returns an empty
    /// list on volatile storage or if the substrate cannot be enumerated.
    #[must_use]
    pub fn available_backups(&self) -> Vec<BackupSummary> {
        let _guard = self.op_lock.lock();
        if !self.backend.is_durable() {
            return Vec::new();
        }

        let all_keys = match self.substrate().keys() {
            Ok(all_keys) => all_keys,
            Err(err) => {
                tracing::error!(error = %err, "failed to enumerate backups");
                return Vec::new();
            }
        };

        let mut backups: Vec<BackupSummary> = all_keys
            .iter()
            .filter(|key| keys::is_backup_key(key))
            .filter_map(|key| {
                let payload = self.substrate().get(key).ok().flatten()?;
                let summary = BackupSummary::from_payload(key, &payload);
                if summary.is_none() {
                    tracing::debug!(%key, "skipping corrupt backup");
                }
                summary
            })
            .collect();
        backups.sort_by(BackupSummary::newest_first);
        backups
    }

    /// Replaces the live collection with a backup's tasks.
    ///
    /// A pre-restore backup of the current state is taken first; if that
    /// fails, nothing is changed. The backup's tasks then go through the
    /// normal save path, so they are validated and sanitized again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackupNotFound`] if `key` is not a backup key
    /// or nothing is stored under it, [`StoreError::InvalidBackup`] if the
    /// payload is corrupt or lacks a task list,
    /// [`StoreError::SafetyBackupFailed`] if the pre-restore backup cannot
    /// be written, or any error from [`save_value`](TaskStore::save_value).
    pub fn restore_from_backup(&self, key: &str) -> Result<RestoreReceipt, StoreError> {
        let _guard = self.op_lock.lock();
        if !self.backend.is_durable() {
            return Err(StoreError::BackupsUnavailable);
        }
        if !keys::is_backup_key(key) {
            return Err(StoreError::BackupNotFound(key.to_string()));
        }

        let payload = self
            .substrate()
            .get(key)?
            .ok_or_else(|| StoreError::BackupNotFound(key.to_string()))?;
        let tasks = match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(mut backup)) => match backup.remove("tasks") {
                Some(tasks @ Value::Array(_)) => tasks,
                _ => return Err(StoreError::InvalidBackup(key.to_string())),
            },
            _ => return Err(StoreError::InvalidBackup(key.to_string())),
        };

        let safety_backup = self.create_backup(BackupReason::PreRestore).map_err(|source| {
            StoreError::SafetyBackupFailed {
                operation: "restore",
                source: Box::new(source),
            }
        })?;

        let receipt = self.save_value(&tasks)?;
        tracing::info!(
            %key,
            restored = receipt.saved,
            dropped = receipt.dropped,
            safety_backup = %safety_backup,
            "restored from backup"
        );
        Ok(RestoreReceipt {
            restored: receipt.saved,
            dropped: receipt.dropped,
            safety_backup,
        })
    }

    /// The newest backup, if it is an error-recovery snapshot of exactly
    /// the payload currently stored under the task key.
    pub(crate) fn existing_recovery_backup(&self) -> Option<BackupKey> {
        let newest = self.available_backups().into_iter().next()?;
        if newest.reason != BackupReason::ErrorRecovery {
            return None;
        }
        let payload = self.substrate().get(&newest.key).ok()??;
        let snapshot: Value = serde_json::from_str(&payload).ok()?;
        let current = self.substrate().get(keys::TASKS).ok()?;
        if snapshot.get("raw").and_then(Value::as_str) != current.as_deref() {
            return None;
        }
        newest.key.parse().ok()
    }

    /// Deletes every readable backup beyond the newest `max_backups`.
    ///
    /// Returns the number of backups removed. Failures are logged and the
    /// remaining deletions are still attempted.
    pub fn clean_old_backups(&self) -> usize {
        let _guard = self.op_lock.lock();
        let mut removed = 0;
        for stale in self.available_backups().iter().skip(self.max_backups) {
            match self.substrate().remove(&stale.key) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(key = %stale.key, "rotated out old backup");
                }
                Err(err) => tracing::warn!(key = %stale.key, error = %err, "failed to remove old backup"),
            }
        }
        removed
    }

    /// Takes an `auto` backup if tasks were saved after the most recent
    /// backup (or no backup exists yet).
    ///
    /// Returns the new key, or `None` when nothing changed since the last
    /// backup, nothing was ever saved, or storage is volatile.
    ///
    /// # Errors
    ///
    /// Returns any error from reading the markers or from
    /// [`create_backup`](TaskStore::create_backup).
    pub fn auto_backup_if_stale(&self) -> Result<Option<BackupKey>, StoreError> {
        let _guard = self.op_lock.lock();
        if !self.backend.is_durable() {
            return Ok(None);
        }

        let Some(last_saved) = self
            .substrate()
            .get(keys::LAST_SAVED)?
            .as_deref()
            .and_then(todomem_proto::parse_instant)
        else {
            return Ok(None);
        };

        if let Some(last_backup) = self.last_backup_instant()? {
            if last_saved <= last_backup {
                return Ok(None);
            }
        }

        self.create_backup(BackupReason::Auto).map(Some)
    }

    /// Timestamp of the backup the pointer names, or of the newest readable
    /// backup if the pointer is missing or dangling.
    fn last_backup_instant(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>, StoreError> {
        if let Some(pointer) = self.substrate().get(keys::LAST_BACKUP)? {
            let summary = self
                .substrate()
                .get(&pointer)?
                .and_then(|payload| BackupSummary::from_payload(&pointer, &payload));
            if let Some(instant) = summary.and_then(|s| s.instant()) {
                return Ok(Some(instant));
            }
        }
        Ok(self
            .available_backups()
            .first()
            .and_then(BackupSummary::instant))
    }

    /// Erases every key this store owns, including all backups.
    ///
    /// A final `clear-all` backup is taken first and removed with the rest;
    /// failing to take it does not stop the wipe. On volatile storage the
    /// owned keys are simply removed. Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Substrate`] if a key cannot be removed; the
    /// wipe may then be partial.
    pub fn clear_all_data(&self, _authorization: ClearAllAuthorization) -> Result<usize, StoreError> {
        let _guard = self.op_lock.lock();
        if self.backend.is_durable() {
            if let Err(err) = self.create_backup(BackupReason::ClearAll) {
                tracing::warn!(error = %err, "final clear-all backup failed, wiping anyway");
            }
        }

        let mut doomed: Vec<String> = keys::OWNED.iter().map(ToString::to_string).collect();
        doomed.extend(
            self.substrate()
                .keys()?
                .into_iter()
                .filter(|key| keys::is_backup_key(key)),
        );

        let mut removed = 0;
        for key in &doomed {
            if self.substrate().get(key)?.is_some() {
                self.substrate().remove(key)?;
                removed += 1;
            }
        }
        tracing::info!(removed, "all task data cleared");
        Ok(removed)
    }
}
