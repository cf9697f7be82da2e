//! Persisted state blobs.
//!
//! Entities store small serde_json blobs under string keys. The file store
//! keeps one JSON file per key under a dot directory next to the daemon's
//! working data; the memory store backs tests.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failure")]
    Io(#[from] std::io::Error),

    #[error("storage encoding failure")]
    Serde(#[from] serde_json::Error),

    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },
}

pub trait Storage: Send + Sync {
    fn store(&self, key: &str, blob: &[u8]) -> StorageResult<()>;
    fn fetch(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
}

/// Serialize a value as JSON and store it under `key`.
pub fn store_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> StorageResult<()> {
    let blob = serde_json::to_vec(value)?;
    storage.store(key, &blob)
}

/// Fetch and deserialize the value stored under `key`, if any.
pub fn fetch_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> StorageResult<Option<T>> {
    match storage.fetch(key)? {
        Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
        None => Ok(None),
    }
}

/// One JSON file per key under a root directory.
#[derive(Clone)]
pub struct FileStore {
    root_dir: PathBuf,
}

impl FileStore {
    pub fn new(root_dir: PathBuf) -> StorageResult<Self> {
        if !root_dir.exists() {
            fs::create_dir_all(&root_dir)?;
        }
        Ok(Self { root_dir })
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        // keys become file names verbatim; reject anything path-like
        if key.is_empty() || key.contains(['/', '\\', '.']) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root_dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStore {
    fn store(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        let path = self.key_path(key)?;
        fs::write(path, blob)?;
        Ok(())
    }

    fn fetch(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStore {
    fn store(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        self.map
            .lock()
            .expect("storage lock")
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn fetch(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.map.lock().expect("storage lock").get(key).cloned())
    }
}
