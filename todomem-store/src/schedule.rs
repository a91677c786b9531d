//! Periodic automatic backups.
//!
//! Two drivers share the same rule ([`TaskStore::auto_backup_if_stale`]):
//! [`AutoBackupSchedule`] is polled by a caller that owns its own loop, and
//! [`spawn_auto_backup`] runs the check on a tokio interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use todomem_proto::BackupKey;

use crate::clock::Clock;
use crate::store::{StoreError, TaskStore};

/// Default period between automatic backup checks.
pub const DEFAULT_AUTO_BACKUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Clock-driven automatic backup timer.
pub struct AutoBackupSchedule {
    interval: TimeDelta,
    next_due: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AutoBackupSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBackupSchedule")
            .field("interval", &self.interval)
            .field("next_due", &self.next_due)
            .finish_non_exhaustive()
    }
}

impl AutoBackupSchedule {
    /// Creates a schedule whose first check is one `interval` from now.
    ///
    /// Intervals too large for the clock saturate to the maximum delta.
    #[must_use]
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        let next_due = clock
            .now()
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            interval,
            next_due,
            clock,
        }
    }

    /// Returns `true` once the next check is due.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.clock.now() >= self.next_due
    }

    /// Runs the staleness check if due.
    ///
    /// Returns `None` when not yet due. Checks missed while the caller was
    /// busy collapse into one; the next check is scheduled one interval
    /// after this call.
    pub fn poll(&mut self, store: &TaskStore) -> Option<Result<Option<BackupKey>, StoreError>> {
        if !self.is_due() {
            return None;
        }
        let now = self.clock.now();
        self.next_due = now
            .checked_add_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Some(store.auto_backup_if_stale())
    }
}

/// Spawns a background task that takes an automatic backup every
/// `interval` when tasks changed since the last one.
///
/// The first check happens one interval after spawning. Missed ticks are
/// skipped. Each check runs on the blocking pool since substrate writes are
/// synchronous file I/O. The task stops when the returned handle is aborted or the
/// runtime shuts down.
pub fn spawn_auto_backup(store: Arc<TaskStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut tick = tokio::time::interval_at(start, interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let check = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || check.auto_backup_if_stale()).await {
                Ok(Ok(Some(key))) => tracing::info!(%key, "automatic backup taken"),
                Ok(Ok(None)) => tracing::trace!("no changes since last backup"),
                Ok(Err(err)) => tracing::warn!(error = %err, "automatic backup failed"),
                Err(err) => tracing::error!(error = %err, "automatic backup check panicked"),
            }
        }
    })
}
