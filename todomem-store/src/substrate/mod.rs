//! Key-value storage the task store is built on.
//!
//! A [`Substrate`] is a synchronous string-keyed map with a capacity limit
//! and enumeration. Two implementations exist:
//! - [`FileSubstrate`]: durable, persisted to a JSON file on every write.
//! - [`MemorySubstrate`]: volatile, lost when the process exits.
//!
//! [`Backend`] records which of the two the store ended up with after its
//! startup probe.

pub mod file;
pub mod memory;

pub use file::FileSubstrate;
pub use memory::MemorySubstrate;

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default capacity, matching the common browser storage allowance.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by a substrate.
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    /// The write would exceed the capacity limit.
    #[error("quota exceeded writing {key}: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded {
        /// Key being written.
        key: String,
        /// Total usage the write would have produced.
        needed: usize,
        /// Configured capacity.
        quota: usize,
    },

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but does not hold a string map.
    #[error("storage file {path} is corrupt: {source}")]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// Encoding the map for the backing file failed.
    #[error("storage encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The substrate cannot be used at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl SubstrateError {
    /// Returns `true` for capacity failures.
    #[must_use]
    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Synchronous string-keyed storage with a capacity limit.
pub trait Substrate: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SubstrateError`] if the substrate cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SubstrateError::QuotaExceeded`] if the write does not fit,
    /// or another variant if the write cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SubstrateError`] if the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), SubstrateError>;

    /// Lists every key currently stored, including keys owned by others.
    ///
    /// # Errors
    ///
    /// Returns [`SubstrateError`] if the substrate cannot be enumerated.
    fn keys(&self) -> Result<Vec<String>, SubstrateError>;

    /// Writes `value` under the scratch `key` and removes it again.
    ///
    /// Used to test availability and whether a payload fits.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever step failed.
    fn probe(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.set(key, value)?;
        self.remove(key)
    }
}

/// The storage capability selected once at startup.
pub enum Backend {
    /// Durable storage; backups are supported.
    Durable(Box<dyn Substrate>),
    /// In-memory stand-in after the durable substrate failed its probe.
    Volatile(MemorySubstrate),
}

impl Backend {
    /// Borrows the active substrate.
    #[must_use]
    pub fn substrate(&self) -> &dyn Substrate {
        match self {
            Self::Durable(substrate) => substrate.as_ref(),
            Self::Volatile(memory) => memory,
        }
    }

    /// Returns `true` for durable storage.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable(_) => f.write_str("Backend::Durable"),
            Self::Volatile(_) => f.write_str("Backend::Volatile"),
        }
    }
}

/// Map plus running size, shared by both substrates.
///
/// Size is the byte length of every key and value.
#[derive(Debug, Default, Clone)]
pub(crate) struct Entries {
    map: BTreeMap<String, String>,
    usage: usize,
}

impl Entries {
    pub(crate) fn from_map(map: BTreeMap<String, String>) -> Self {
        let usage = map.iter().map(|(k, v)| k.len() + v.len()).sum();
        Self { map, usage }
    }

    pub(crate) const fn map(&self) -> &BTreeMap<String, String> {
        &self.map
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    /// Usage after replacing `key` with `value`.
    pub(crate) fn usage_after_set(&self, key: &str, value: &str) -> usize {
        let previous = self.map.get(key).map_or(0, |v| key.len() + v.len());
        self.usage - previous + key.len() + value.len()
    }

    /// Checks `quota`, then inserts. Returns the replaced value.
    pub(crate) fn insert(
        &mut self,
        key: &str,
        value: &str,
        quota: Option<usize>,
    ) -> Result<Option<String>, SubstrateError> {
        let needed = self.usage_after_set(key, value);
        if let Some(quota) = quota.filter(|&quota| needed > quota) {
            return Err(SubstrateError::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota,
            });
        }
        self.usage = needed;
        Ok(self.map.insert(key.to_string(), value.to_string()))
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.map.remove(key)?;
        self.usage -= key.len() + removed.len();
        Some(removed)
    }

    /// Puts back what `insert` replaced (or drops the new key).
    pub(crate) fn restore(&mut self, key: &str, previous: Option<String>) {
        self.remove(key);
        if let Some(previous) = previous {
            self.usage += key.len() + previous.len();
            self.map.insert(key.to_string(), previous);
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub(crate) const fn usage(&self) -> usize {
        self.usage
    }
}
