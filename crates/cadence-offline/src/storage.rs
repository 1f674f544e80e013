//! Persisted key/value storage.
//!
//! [`Storage`] is the narrow interface over whatever durable facility the
//! platform offers. [`Store`] wraps one behind a mutex so that every
//! read-modify-write of a collection runs as a single writer within the
//! process. Coordination across processes sharing the same file is not
//! provided.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write would exceed the storage quota.
    #[error("Storage quota exceeded: need {needed} bytes, limit {limit}")]
    QuotaExceeded {
        /// Total bytes the write would require.
        needed: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// String key/value storage.
pub trait Storage: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn footprint(entries: &HashMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// In-memory storage with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    /// Create unbounded storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that rejects writes beyond `quota` bytes of keys
    /// and values.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);

        if let Some(limit) = self.quota {
            let previous = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = footprint(&entries) - previous + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

/// Storage persisted as one JSON document on disk.
///
/// The document is loaded when opened and rewritten on every change via a
/// temporary file and a rename, so a crash leaves either the old or the
/// new document in place.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open the document at `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// document cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened file storage");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;

        trace!(path = %self.path.display(), entries = entries.len(), "Persisted storage");
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

/// Serialized access to a [`Storage`] with JSON-typed helpers.
///
/// Clones share the same storage and lock.
#[derive(Clone)]
pub struct Store {
    storage: Arc<Mutex<Box<dyn Storage>>>,
}

impl Store {
    /// Wrap a storage backend.
    #[must_use]
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// A store backed by unbounded memory.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Read and deserialize a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the value does not parse.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let storage = lock(&self.storage);
        read_json(storage.as_ref(), key)
    }

    /// Serialize and write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend fails.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let text = serde_json::to_string(value)?;
        lock(&self.storage).set(key, text)
    }

    /// Read, modify and write back a value as one step.
    ///
    /// A missing value starts from `T::default()`. Nothing is written if
    /// `f` leaves the value unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read, parsed or written.
    pub fn update<T, R, F>(&self, key: &str, f: F) -> Result<R, StorageError>
    where
        T: Serialize + DeserializeOwned + Default + Clone + PartialEq,
        F: FnOnce(&mut T) -> R,
    {
        let storage = lock(&self.storage);
        let current: T = read_json(storage.as_ref(), key)?.unwrap_or_default();
        let mut next = current.clone();
        let result = f(&mut next);
        if next != current {
            storage.set(key, serde_json::to_string(&next)?)?;
        }
        Ok(result)
    }

    /// Remove a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.storage).remove(key)
    }

    /// List keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = lock(&self.storage)
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn read_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn test_memory_quota() {
        let storage = MemoryStorage::with_quota(16);
        storage.set("a", "12345".into()).unwrap();

        match storage.set("b", "1234567890".into()) {
            Err(StorageError::QuotaExceeded { needed, limit }) => {
                assert_eq!(needed, 17);
                assert_eq!(limit, 16);
            }
            other => panic!("Expected QuotaExceeded, got {:?}", other),
        }

        // Overwriting counts the replaced value as freed.
        storage.set("a", "1234567890123456".into()).unwrap_err();
        storage.set("a", "12345678901234".into()).unwrap();
        assert_eq!(storage.get("b").unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set("cache:/x", "{\"a\":1}".into()).unwrap();
            storage.set("other", "2".into()).unwrap();
            storage.remove("other").unwrap();
        }

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get("cache:/x").unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(storage.keys().unwrap(), vec!["cache:/x".to_string()]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStorage::open(&path),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_store_update() {
        let store = Store::memory();

        let hits = store
            .update("counter", |c: &mut Counter| {
                c.hits += 1;
                c.hits
            })
            .unwrap();
        assert_eq!(hits, 1);

        store.update("counter", |c: &mut Counter| c.hits += 1).unwrap();
        assert_eq!(store.read::<Counter>("counter").unwrap(), Some(Counter { hits: 2 }));
    }

    #[test]
    fn test_store_read_type_mismatch() {
        let store = Store::memory();
        store.write("counter", &"not a counter").unwrap();
        assert!(matches!(
            store.read::<Counter>("counter"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_keys_with_prefix() {
        let store = Store::memory();
        store.write("cache:/b", &1).unwrap();
        store.write("cache:/a", &2).unwrap();
        store.write("pending-requests", &Vec::<u8>::new()).unwrap();

        assert_eq!(
            store.keys_with_prefix("cache:").unwrap(),
            vec!["cache:/a".to_string(), "cache:/b".to_string()]
        );
    }
}
