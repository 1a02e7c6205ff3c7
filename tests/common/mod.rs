//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use voiceform::domain::RecordId;
use voiceform::storage::UpdateFn;
use voiceform::{
    KeyValueStore, MemoryStore, RemoteError, RemotePayload, RemoteStore, ServerRecord,
    StorageError,
};

/// In-process remote table. Rejects inserts for names in `reject`.
#[derive(Default)]
pub struct FakeRemote {
    rows: Mutex<Vec<ServerRecord>>,
    sent: Mutex<Vec<RemotePayload>>,
    reject: Mutex<HashSet<String>>,
    down: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(names: &[&str]) -> Self {
        let remote = Self::new();
        remote
            .reject
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        remote
    }

    pub fn accept_all(&self) {
        self.reject.lock().unwrap().clear();
    }

    /// Make every insert take this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    /// Every payload that reached `insert`, including rejected ones
    pub fn sent(&self) -> Vec<RemotePayload> {
        self.sent.lock().unwrap().clone()
    }

    /// Rows actually stored
    pub fn rows(&self) -> Vec<ServerRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    fn name(&self) -> &str {
        "fake"
    }

    async fn insert(&self, _table: &str, record: &RemotePayload) -> Result<ServerRecord, RemoteError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(record.clone());

        if *self.down.lock().unwrap() {
            return Err(RemoteError::Unavailable("network down".to_string()));
        }
        if self.reject.lock().unwrap().contains(&record.name) {
            return Err(RemoteError::Api {
                status: 400,
                message: format!("bad row {}", record.name),
            });
        }

        let mut rows = self.rows.lock().unwrap();
        let row = ServerRecord {
            id: RecordId::Int(rows.len() as i64 + 1),
            name: record.name.clone(),
            email: Some(record.email.clone()),
            phone: record.phone.clone(),
            address: record.address.clone(),
            message: record.message.clone(),
            created_at: record.created_at.map(|t| t.to_rfc3339()),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list(&self, _table: &str) -> Result<Vec<ServerRecord>, RemoteError> {
        let mut rows = self.rows();
        rows.reverse();
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        if *self.down.lock().unwrap() {
            Err(RemoteError::Unavailable("network down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Memory store whose reads and writes can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    reads_fail: AtomicBool,
    writes_fail: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{} failed", what),
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::check(&self.reads_fail, "read")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::check(&self.writes_fail, "write")?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        Self::check(&self.writes_fail, "write")?;
        self.inner.remove(key).await
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError> {
        Self::check(&self.reads_fail, "read")?;
        let writes_fail = self.writes_fail.load(Ordering::SeqCst);

        self.inner
            .update(
                key,
                Box::new(move |current| {
                    let next = apply(current)?;
                    if next.is_some() && writes_fail {
                        return Err(StorageError::Io(io::Error::new(
                            io::ErrorKind::Other,
                            "write failed",
                        )));
                    }
                    Ok(next)
                }),
            )
            .await
    }
}
