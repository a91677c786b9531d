//! Volatile substrate backed by an in-memory map.

use parking_lot::Mutex;

use super::{Entries, Substrate, SubstrateError};

/// In-memory [`Substrate`].
///
/// Used as the fallback when durable storage is unavailable, and as a fake
/// in tests. Unlimited by default; [`with_quota`](Self::with_quota) adds a
/// capacity limit so quota handling can be exercised without disk.
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    entries: Mutex<Entries>,
    quota: Option<usize>,
}

impl MemorySubstrate {
    /// Creates an empty, unlimited substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty substrate holding at most `quota` bytes.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            quota: Some(quota),
        }
    }

    /// Bytes currently used by keys and values.
    #[must_use]
    pub fn usage(&self) -> usize {
        self.entries.lock().usage()
    }
}

impl Substrate for MemorySubstrate {
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.entries.lock().get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.entries.lock().insert(key, value, self.quota)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SubstrateError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SubstrateError> {
        Ok(self.entries.lock().keys())
    }
}
