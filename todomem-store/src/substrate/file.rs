//! Durable substrate persisted as a single JSON object on disk.
//!
//! The whole map is rewritten on every mutation (temp file + rename), so a
//! crash mid-write leaves the previous contents intact. The map is small by
//! construction: the quota caps it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{DEFAULT_QUOTA_BYTES, Entries, Substrate, SubstrateError};

/// File-backed [`Substrate`].
#[derive(Debug)]
pub struct FileSubstrate {
    path: PathBuf,
    quota: usize,
    entries: Mutex<Entries>,
}

impl FileSubstrate {
    /// Opens (or prepares to create) the storage file at `path` with the
    /// default quota.
    ///
    /// # Errors
    ///
    /// See [`open_with_quota`](Self::open_with_quota).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SubstrateError> {
        Self::open_with_quota(path, DEFAULT_QUOTA_BYTES)
    }

    /// Opens the storage file at `path`, holding at most `quota` bytes.
    ///
    /// A missing file is an empty map; its parent directory is created.
    /// An existing file that is not a JSON string map is reported as
    /// corrupt and left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SubstrateError::Io`] if the directory cannot be created or
    /// the file cannot be read, or [`SubstrateError::Corrupt`] if it cannot
    /// be parsed.
    pub fn open_with_quota(path: impl Into<PathBuf>, quota: usize) -> Result<Self, SubstrateError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let map = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str::<BTreeMap<String, String>>(&contents).map_err(
                |source| SubstrateError::Corrupt {
                    path: path.clone(),
                    source,
                },
            )?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), keys = map.len(), "opened storage file");

        Ok(Self {
            path,
            quota,
            entries: Mutex::new(Entries::from_map(map)),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently used by keys and values.
    #[must_use]
    pub fn usage(&self) -> usize {
        self.entries.lock().usage()
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<(), SubstrateError> {
        let encoded = serde_json::to_string(map)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Substrate for FileSubstrate {
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.entries.lock().get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key, value, Some(self.quota))?;
        if let Err(err) = self.flush(entries.map()) {
            entries.restore(key, previous);
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SubstrateError> {
        let mut entries = self.entries.lock();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.flush(entries.map()) {
            entries.restore(key, Some(previous));
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SubstrateError> {
        Ok(self.entries.lock().keys())
    }
}
