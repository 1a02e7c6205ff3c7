//! Durable offline queue of pending submissions.
//!
//! The whole queue is one JSON array under a single storage key. Every
//! mutation is a read-modify-write of the full list through
//! `KeyValueStore::update`, persisted before the call returns. The backend
//! holds its lock across each cycle, so two processes sharing a home
//! directory never lose each other's entries; within a process an async
//! mutex additionally orders `save` and `remove`.
//!
//! Reads for display are forgiving: a missing key, unreadable storage or
//! malformed JSON all read as an empty queue (logged, never raised).
//! Mutations are strict: if the current list cannot be read, nothing is
//! written. Entries that fail to parse are hidden from `get_all` but kept
//! verbatim in storage.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{FormData, QueuedSubmission};
use crate::storage::{KeyValueStore, StorageError};

/// Storage key holding the queue
pub const QUEUE_KEY: &str = "offline_submissions";

/// Errors that can occur when writing the queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Queue status summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    /// Stored entries that could not be read as submissions
    pub unreadable: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

struct QueueState {
    /// Highest tempId handed out by this process
    last_issued: u64,
}

/// Key-value backed queue of submissions awaiting upload
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    state: Mutex<QueueState>,
}

impl OfflineQueue {
    /// Create a queue over a storage backend using the default key
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, QUEUE_KEY)
    }

    /// Create a queue stored under a custom key
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            state: Mutex::new(QueueState { last_issued: 0 }),
        }
    }

    /// Storage key this queue lives under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a submission, assigning its tempId and capture time
    pub async fn save(&self, form: FormData) -> Result<QueuedSubmission, QueueError> {
        let mut state = self.state.lock().await;
        let last_issued = &mut state.last_issued;
        let key = self.key.as_str();
        let mut saved = None;
        let mut pending = 0;

        self.store
            .update(
                key,
                Box::new(|raw| {
                    let mut entries = parse_entries(raw.as_deref(), key);
                    let submission = QueuedSubmission {
                        form,
                        temp_id: next_temp_id(last_issued, &entries, Utc::now()),
                        created_at: Utc::now().trunc_subsecs(3),
                    };

                    entries.push(serde_json::to_value(&submission)?);
                    let json = serde_json::to_string(&entries)?;
                    pending = entries.len();
                    saved = Some(submission);
                    Ok(Some(json))
                }),
            )
            .await?;

        let submission = saved.ok_or_else(|| {
            StorageError::Lock("storage skipped the queue update".to_string())
        })?;
        debug!(temp_id = %submission.temp_id, pending, "Submission queued");
        Ok(submission)
    }

    /// Current queue contents, oldest first
    pub async fn get_all(&self) -> Vec<QueuedSubmission> {
        let _state = self.state.lock().await;
        self.snapshot().await.0
    }

    /// Look up one entry
    pub async fn get(&self, temp_id: &str) -> Option<QueuedSubmission> {
        self.get_all()
            .await
            .into_iter()
            .find(|item| item.temp_id == temp_id)
    }

    /// Number of pending entries
    pub async fn len(&self) -> usize {
        self.get_all().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove an entry. Returns whether anything was removed; a missing
    /// tempId leaves storage untouched.
    pub async fn remove(&self, temp_id: &str) -> Result<bool, QueueError> {
        let _state = self.state.lock().await;
        let key = self.key.as_str();
        let mut remaining = None;

        self.store
            .update(
                key,
                Box::new(|raw| {
                    let mut entries = parse_entries(raw.as_deref(), key);
                    let before = entries.len();
                    entries.retain(|entry| entry_id(entry).as_deref() != Some(temp_id));
                    if entries.len() == before {
                        return Ok(None);
                    }

                    remaining = Some(entries.len());
                    Ok(Some(serde_json::to_string(&entries)?))
                }),
            )
            .await?;

        match remaining {
            Some(pending) => {
                debug!(temp_id, pending, "Submission removed from queue");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every entry
    pub async fn clear(&self) -> Result<(), QueueError> {
        let _state = self.state.lock().await;
        self.store.remove(&self.key).await?;
        info!("Offline queue cleared");
        Ok(())
    }

    /// Summary for status displays
    pub async fn status(&self) -> QueueStatus {
        let (items, unreadable) = {
            let _state = self.state.lock().await;
            self.snapshot().await
        };

        QueueStatus {
            pending: items.len(),
            unreadable,
            oldest: items.iter().map(|item| item.created_at).min(),
            newest: items.iter().map(|item| item.created_at).max(),
        }
    }

    /// Readable entries plus the count of unreadable ones, degrading to
    /// empty on any storage failure
    async fn snapshot(&self) -> (Vec<QueuedSubmission>, usize) {
        let raw = match self.store.get(&self.key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, "Queue storage unavailable, treating as empty: {}", e);
                return (Vec::new(), 0);
            }
        };

        let entries = parse_entries(raw.as_deref(), &self.key);
        let total = entries.len();
        let items: Vec<QueuedSubmission> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(idx, entry)| match serde_json::from_value(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(key = %self.key, index = idx, "Skipping unreadable queue entry: {}", e);
                    None
                }
            })
            .collect();

        let unreadable = total - items.len();
        (items, unreadable)
    }
}

/// Split the stored list into raw entries. Anything that is not a JSON
/// array reads as an empty queue.
fn parse_entries(raw: Option<&str>, key: &str) -> Vec<Value> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(key, "Queue data is malformed, treating as empty: {}", e);
            Vec::new()
        }
    }
}

/// The `tempId` of a raw entry, if it has one
fn entry_id(entry: &Value) -> Option<String> {
    match entry.get("tempId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Next tempId: the current millisecond timestamp, bumped past anything
/// already issued or queued so ids only ever increase. Once that would
/// pass `u64::MAX` (only seen with corrupt data) it falls back to the first
/// free id from now.
fn next_temp_id(last_issued: &mut u64, entries: &[Value], now: DateTime<Utc>) -> String {
    let taken: Vec<String> = entries.iter().filter_map(entry_id).collect();
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let max_queued = taken
        .iter()
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    let floor = last_issued
        .checked_add(1)
        .zip(max_queued.checked_add(1))
        .map(|(after_issued, after_queued)| now_ms.max(after_issued).max(after_queued));

    let id = floor
        .and_then(|floor| first_free(floor, &taken))
        .or_else(|| first_free(now_ms, &taken))
        .unwrap_or(now_ms);

    *last_issued = id;
    id.to_string()
}

/// First id at or after `start` not in `taken`, without overflowing
fn first_free(start: u64, taken: &[String]) -> Option<u64> {
    let mut candidate = start;
    loop {
        if !taken.iter().any(|id| *id == candidate.to_string()) {
            return Some(candidate);
        }
        candidate = candidate.checked_add(1)?;
    }
}
