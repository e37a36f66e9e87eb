//! Key-value persistence for monitor state.
//!
//! All state is stored as strings under well-known keys namespaced per
//! monitor key: JSON for composite records, bare milliseconds for the
//! cooldown anchor. Live and scheduled paths share these keys.
//!
//! # Panic-Free Guarantees
//!
//! Lock poisoning and I/O failures surface as `StoreError`; nothing here
//! panics.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use orderwatch_core::MonitorKey;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::lock::FileLock;

// ============================================================================
// Storage Keys
// ============================================================================

/// Prefix shared by every key this crate writes.
pub const NAMESPACE: &str = "orderwatch";

/// Key holding the captured request template.
pub const REQUEST_TEMPLATE_KEY: &str = "orderwatch:request_template";

const SNAPSHOT_SUFFIX: &str = ":snapshot";

/// Key of the last persisted observation for `key`.
pub fn snapshot_key(key: &MonitorKey) -> String {
    format!("{NAMESPACE}:{key}{SNAPSHOT_SUFFIX}")
}

/// Key of the last classified status for `key`.
pub fn status_key(key: &MonitorKey) -> String {
    format!("{NAMESPACE}:{key}:status")
}

/// Key of the cooldown anchor for `key`.
pub fn notified_at_key(key: &MonitorKey) -> String {
    format!("{NAMESPACE}:{key}:notified_at")
}

/// Lists monitor keys that have a persisted snapshot.
pub fn monitor_keys(store: &dyn KvStore) -> Result<Vec<MonitorKey>, StoreError> {
    let prefix = format!("{NAMESPACE}:");
    Ok(store
        .keys()?
        .iter()
        .filter_map(|k| k.strip_prefix(&prefix)?.strip_suffix(SNAPSHOT_SUFFIX))
        .map(MonitorKey::new)
        .collect())
}

// ============================================================================
// Store Trait
// ============================================================================

/// Errors from a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but is not a JSON string map.
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A previous writer panicked while holding the lock.
    #[error("store lock poisoned")]
    Poisoned,
}

/// String key-value store consumed by the tracker and the gate.
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns every stored key.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store, used for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

// ============================================================================
// File Store
// ============================================================================

/// File name used inside the state directory.
pub const STORE_FILE_NAME: &str = "store.json";

/// Store persisted as one JSON object on disk.
///
/// The file is the only copy of the data: every read loads it and every
/// write rewrites it through a temporary sibling and a rename, so a
/// daemon and a one-shot `ingest` process see each other's updates and a
/// crash never leaves a half-written store behind. Each operation holds
/// an exclusive lock on `<file>.lock` for its whole load-modify-rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file is missing.
    ///
    /// Fails if the file exists but is not a JSON string map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");
        let store = Self {
            path,
            lock_path: PathBuf::from(lock_path),
        };
        let entries = {
            let _guard = store.lock()?;
            store.load()?
        };
        debug!(path = %store.path.display(), entries = entries.len(), "File store opened");
        Ok(store)
    }

    /// Opens `store.json` inside `state_dir`, creating the directory.
    pub fn open_in(state_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(state_dir)?;
        Self::open(state_dir.join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        Ok(FileLock::acquire(&self.lock_path)?)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock()?;
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock()?;
        Ok(self.load()?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        let key = MonitorKey::for_order("E1");
        assert_eq!(snapshot_key(&key), "orderwatch:order:E1:snapshot");
        assert_eq!(status_key(&key), "orderwatch:order:E1:status");
        assert_eq!(notified_at_key(&key), "orderwatch:order:E1:notified_at");
    }

    #[test]
    fn test_memory_store_read_write() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.read("a").unwrap(), None);
        store.write("a", "1").unwrap();
        store.write("a", "2").unwrap();
        assert_eq!(store.read("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_monitor_keys_from_snapshots() {
        let store = MemoryStore::new();
        store.write(&snapshot_key(&MonitorKey::for_order("A")), "{}").unwrap();
        store.write(&status_key(&MonitorKey::for_order("B")), "{}").unwrap();
        store.write(&snapshot_key(&MonitorKey::default()), "{}").unwrap();
        store.write(REQUEST_TEMPLATE_KEY, "{}").unwrap();

        let keys = monitor_keys(&store).unwrap();
        assert_eq!(keys, vec![MonitorKey::for_order("A"), MonitorKey::default()]);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open_in(dir.path()).unwrap();
            store.write("k", "v").unwrap();
        }
        let store = FileStore::open_in(dir.path()).unwrap();
        assert_eq!(store.read("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.path(), dir.path().join(STORE_FILE_NAME));
    }

    #[test]
    fn test_file_stores_on_same_path_share_writes() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = FileStore::open_in(dir.path()).unwrap();
        let ingest = FileStore::open_in(dir.path()).unwrap();

        ingest.write("a", "1").unwrap();
        daemon.write("b", "2").unwrap();
        assert_eq!(daemon.read("a").unwrap().as_deref(), Some("1"));
        assert_eq!(ingest.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_file_stores_keep_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = ["daemon", "ingest"]
            .into_iter()
            .map(|name| {
                let store = FileStore::open_in(dir.path()).unwrap();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        store.write(&format!("{name}:{i}"), "v").unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store = FileStore::open_in(dir.path()).unwrap();
        assert_eq!(store.keys().unwrap().len(), 400);
        assert_eq!(store.read("ingest:199").unwrap().as_deref(), Some("v"));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != STORE_FILE_NAME && !name.ends_with(".lock"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(&path, "{oops").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_file_store_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(&path, "").unwrap();
        assert!(FileStore::open(&path).unwrap().keys().unwrap().is_empty());
    }
}
