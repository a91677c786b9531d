//! Shared record definitions for `todomem` persistence.
//!
//! Everything that crosses the storage boundary lives here: the [`Task`]
//! schema and its validation rules, backup records and summaries, and the
//! key namespace the store owns inside the substrate.

pub mod backup;
pub mod keys;
pub mod task;

pub use backup::{Backup, BackupKey, BackupReason, BackupSummary};
pub use task::{Task, format_instant, instant_from_value, is_valid_instant, parse_instant};

/// Maximum number of backups retained; older ones are evicted first.
pub const MAX_BACKUP_ITEMS: usize = 5;

/// Schema version stamped into the substrate and into every backup.
pub const SCHEMA_VERSION: &str = "1.0.0";
