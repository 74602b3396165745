//! Persistent string storage.
//!
//! The session only needs a get/set string store. [`MemoryStore`] keeps
//! values for the lifetime of the process; [`FileStore`] keeps one file per
//! key inside a directory so the remembered peripheral survives restarts.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::error::{Error, Result};

/// A simple string key-value store.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore {
    /// Read the value under `key`. A missing key is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed store, one file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` for storage. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(file_name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                trace!("Read {} from {}", key, path.display());
                Ok(Some(contents.trim().to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Storage {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let storage_error = |source| Error::Storage {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(storage_error)?;
        let path = self.path_for(key);
        fs::write(&path, value).map_err(storage_error)?;
        trace!("Wrote {} to {}", key, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gatt-central-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "one").unwrap();
        store.set("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_missing_key() {
        let store = FileStore::new(scratch_dir("missing"));
        assert_eq!(store.get("KEY_PERIPHERAL_UUID").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = scratch_dir("persist");

        FileStore::new(&dir)
            .set("KEY_PERIPHERAL_UUID", "UUID-1")
            .unwrap();
        let reopened = FileStore::new(&dir);
        assert_eq!(
            reopened.get("KEY_PERIPHERAL_UUID").unwrap().as_deref(),
            Some("UUID-1")
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_sanitizes_key() {
        let store = FileStore::new("/tmp/store");
        assert_eq!(store.path_for("a/b c"), PathBuf::from("/tmp/store/a_b_c"));
    }
}
