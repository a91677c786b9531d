//! Task persistence core for `todomem`.
//!
//! [`TaskStore`] loads and saves the task collection on top of a
//! [`Substrate`], validating every record on the way in and out, and
//! manages timestamped backups with rotation, restore and a full wipe.
//! When the substrate fails its startup probe the store degrades to a
//! volatile in-memory map for the rest of the process.

pub mod backup;
pub mod clock;
pub mod schedule;
pub mod store;
pub mod substrate;

pub use backup::{ClearAllAcknowledged, ClearAllAuthorization, ClearAllRequest, RestoreReceipt};
pub use clock::{Clock, ManualClock, SystemClock};
pub use schedule::{AutoBackupSchedule, DEFAULT_AUTO_BACKUP_INTERVAL, spawn_auto_backup};
pub use store::{
    LoadIssue, LoadReport, MemoryStats, MigrationOutcome, SaveReceipt, StorageKind, StoreError,
    TaskStore,
};
pub use substrate::{Backend, FileSubstrate, MemorySubstrate, Substrate, SubstrateError};
