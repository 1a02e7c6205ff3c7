//! File-backed key-value store.
//!
//! Each key lives in `<dir>/<key>.json`. Writes go to a temp file in the
//! same directory and are renamed over the target, so readers see either
//! the old list or the new one. Writers take an exclusive lock on a sidecar
//! `<key>.lock`; `update` holds it from the read through the rename, which
//! serializes read-modify-write across processes sharing the directory.

use std::fs::{self as stdfs, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tempfile::NamedTempFile;
use tokio::fs;

use super::{validate_key, KeyValueStore, StorageError, UpdateFn};

/// Directory of JSON files, one per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the value files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the value file for a key
    pub fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    /// Block (off the runtime) until the key's lock file is ours. The lock
    /// is released when the returned handle is dropped.
    async fn lock_key(&self, key: &str) -> Result<File, StorageError> {
        validate_key(key)?;

        let dir = self.dir.clone();
        let lock_path = self.lock_path(key);

        blocking(move || {
            stdfs::create_dir_all(&dir)?;

            let lock_file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)?;
            lock_file
                .lock_exclusive()
                .map_err(|e| StorageError::Lock(e.to_string()))?;

            Ok(lock_file)
        })
        .await
    }

    async fn write_locked(&self, key: &str, value: String) -> Result<(), StorageError> {
        let dir = self.dir.clone();
        let value_path = self.value_path(key);

        blocking(move || {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&value_path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
    }
}

async fn blocking<T, F>(op: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}

fn release(lock: File) {
    let _ = lock.unlock();
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;

        match fs::read_to_string(self.value_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let lock = self.lock_key(key).await?;
        let result = self.write_locked(key, value.to_string()).await;
        release(lock);
        result
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let lock = self.lock_key(key).await?;
        let result = match fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        release(lock);
        result
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError> {
        let lock = self.lock_key(key).await?;

        let result = match self.get(key).await {
            Ok(current) => match apply(current) {
                Ok(Some(next)) => self.write_locked(key, next).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        release(lock);
        result
    }
}
