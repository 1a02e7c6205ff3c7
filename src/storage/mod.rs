//! Persistent key-value storage backing the offline queue.
//!
//! The queue only needs a few string operations under one fixed key, so
//! backends stay small:
//! - `FileStore`: one JSON file per key, atomic replace + advisory lock
//! - `SqliteStore`: a single `kv` table
//! - `MemoryStore`: process-local, for tests and ephemeral sessions
//!
//! `update` is the read-modify-write primitive. Each backend holds its
//! exclusive lock (fs2 lock file, `BEGIN IMMEDIATE`, mutex) from the read to
//! the write, so concurrent writers in other processes cannot interleave.

pub mod file;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use sqlite::SqliteStore;

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage lock unavailable: {0}")]
    Lock(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Computes the new value for a key from its current one.
/// `Ok(None)` leaves the stored value untouched.
pub type UpdateFn<'a> =
    Box<dyn FnOnce(Option<String>) -> Result<Option<String>, StorageError> + Send + 'a>;

/// String key-value storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` if the key was never set or was removed
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value for a key. Durable once this returns.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key (no-op if absent)
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read-modify-write under the backend's exclusive lock. A failed read
    /// aborts before `apply` runs; an error from `apply` writes nothing.
    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value (useful for simulating corrupt data)
    pub fn with_value(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.values
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError> {
        let mut values = self.lock()?;
        if let Some(next) = apply(values.get(key).cloned())? {
            values.insert(key.to_string(), next);
        }
        Ok(())
    }
}

/// Keys become file names, so keep them to a safe character set
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
