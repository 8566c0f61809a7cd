// Persistent key-value storage capability
// The cache and the quota tracker own no state of their own; everything they
// persist goes through this trait so the backing store can be swapped
// (in-memory map, JSON file, or a shared store for multi-instance deployments).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage full: {needed} bytes needed, {available} available")]
    Full { needed: usize, available: usize },

    #[error("Corrupt value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// Callback for atomic read-modify-write. Receives the current value and
// returns the value to write, or None to leave the key untouched.
pub type UpdateFn<'a> = dyn FnMut(Option<&str>) -> Option<String> + 'a;

pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    // Read-modify-write that no other writer can interleave with
    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError>;
}

pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(key, raw)
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

// In-process store backed by a concurrent map.
// An optional byte capacity makes writes fail with StoreError::Full
// once keys plus values would exceed it, mirroring a browser storage quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    size_bytes: AtomicUsize,
    max_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::default()
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_capacity(&self, old_size: usize, new_size: usize) -> Result<(), StoreError> {
        if let Some(max) = self.max_bytes {
            let current = self.size_bytes.load(Ordering::SeqCst);
            let projected = current.saturating_sub(old_size) + new_size;
            if projected > max {
                return Err(StoreError::Full {
                    needed: new_size,
                    available: max.saturating_sub(current.saturating_sub(old_size)),
                });
            }
        }
        Ok(())
    }

    fn account(&self, old_size: usize, new_size: usize) {
        self.size_bytes.fetch_add(new_size, Ordering::SeqCst);
        self.size_bytes.fetch_sub(old_size, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut value = Some(value);
        self.update(key, &mut |_| value.take())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if let Some((k, v)) = self.entries.remove(key) {
            self.size_bytes
                .fetch_sub(entry_size(&k, &v), Ordering::SeqCst);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(next) = f(Some(occupied.get().as_str())) {
                    let old_size = entry_size(key, occupied.get());
                    let new_size = entry_size(key, &next);
                    self.check_capacity(old_size, new_size)?;
                    occupied.insert(next);
                    self.account(old_size, new_size);
                }
            }
            Entry::Vacant(vacant) => {
                if let Some(next) = f(None) {
                    let new_size = entry_size(key, &next);
                    self.check_capacity(0, new_size)?;
                    vacant.insert(next);
                    self.account(0, new_size);
                }
            }
        }
        Ok(())
    }
}

// Store persisted as a single JSON object on disk.
// Every mutation rewrites the file (via a temporary file and a rename) while
// holding the lock, so state survives restarts and updates are atomic within
// the process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(entries).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let current = entries.get(key).map(String::as_str);
        if let Some(next) = f(current) {
            let previous = entries.insert(key.to_string(), next);
            if let Err(e) = self.persist(&entries) {
                match previous {
                    Some(previous) => entries.insert(key.to_string(), previous),
                    None => entries.remove(key),
                };
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", "1".to_string()).unwrap();
        store.set("b", "2".to_string()).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.size_bytes(), 2);
    }

    #[test]
    fn test_memory_store_rejects_writes_past_capacity() {
        let store = MemoryStore::with_capacity_bytes(10);
        store.set("k", "12345".to_string()).unwrap();

        let result = store.set("other", "123456".to_string());
        assert!(matches!(result, Err(StoreError::Full { .. })));

        // Replacing an existing value only counts the difference
        store.set("k", "123456789".to_string()).unwrap();
        assert_eq!(store.size_bytes(), 10);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    store
                        .update("counter", &mut |current| {
                            let n: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
                            Some((n + 1).to_string())
                        })
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("counter").unwrap().as_deref(), Some("2000"));
    }

    #[test]
    fn test_update_returning_none_leaves_value() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string()).unwrap();
        store.update("k", &mut |_| None).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_read_json_reports_corrupt_values() {
        let store = MemoryStore::new();
        store.set("bad", "{not json".to_string()).unwrap();
        let result: Result<Option<Vec<u32>>, _> = read_json(&store, "bad");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));

        write_json(&store, "good", &vec![1u32, 2, 3]).unwrap();
        let value: Option<Vec<u32>> = read_json(&store, "good").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("quota", "{\"used\":3}".to_string()).unwrap();
            store.set("temp", "x".to_string()).unwrap();
            store.delete("temp").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("quota").unwrap().as_deref(),
            Some("{\"used\":3}")
        );
        assert!(reopened.get("temp").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "garbage").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
