//! Durable key-value storage
//!
//! Filesystems persist themselves as one JSON record per filesystem id.
//! The backend only has to store strings under string keys.
//!
//! Backends:
//! - `MemoryStorage`: shared in-process map (tests, ephemeral sessions)
//! - `DirStorage`: one file per key inside a host directory

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O failed
    Io(String),
    /// Key contains characters the backend cannot store
    InvalidKey(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(msg) => write!(f, "storage I/O error: {}", msg),
            StorageError::InvalidKey(key) => write!(f, "invalid storage key: {}", key),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// A string-keyed durable store
pub trait Storage {
    /// Load the value under `key`, `None` if absent
    fn load(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn store(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// All keys currently stored, sorted
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// In-memory storage. Clones share the same map, so a test can keep one
/// handle and reconstruct a filesystem from what another handle saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    map: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.map.borrow().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> StorageResult<()> {
        self.map
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.map.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.map.borrow().keys().cloned().collect())
    }
}

/// Host-directory storage: `<dir>/<key>.json`
///
/// Keys may use ASCII letters, digits, `-`, `_`, `.` and `:`. A `:` is
/// written as `@` on disk so that keys map back from file names.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

const FILE_SUFFIX: &str = ".json";

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let name = format!("{}{}", key.replace(':', "@"), FILE_SUFFIX);
        Ok(self.root.join(name))
    }
}

impl Storage for DirStorage {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.file_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.file_for(key)?;
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }
        // Write-then-rename so a crash never leaves half a record behind
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.file_for(key)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(FILE_SUFFIX) {
                keys.push(stem.replace('@', ":"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
