//! Sync drainer: flush the offline queue into the remote store.
//!
//! One pass takes a snapshot of the queue, then for each entry (oldest
//! first) makes exactly one insert attempt. A success removes that entry
//! right away, so an interrupted pass leaves only the unsynced remainder
//! queued and a rerun cannot insert anything twice. A failure leaves the
//! entry queued for the next pass and the loop moves on.
//!
//! Passes never overlap. Within a process the gate mutex is held for the
//! whole pass; across processes an optional lock file is taken with
//! `try_lock_exclusive`, and a pass that finds it held is skipped.
//!
//! If an insert succeeds but the entry cannot be removed, its tempId is
//! remembered; later passes only retry the removal for it.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::adapters::{RemoteStore, DEFAULT_TABLE};
use crate::domain::ServerRecord;
use crate::storage::StorageError;

use super::queue::OfflineQueue;

/// Result of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// tempIds inserted remotely (and removed from the queue)
    pub succeeded: Vec<String>,

    /// tempIds whose insert failed (still queued)
    pub failed: Vec<String>,

    /// Server rows for the succeeded entries, in the same order
    pub uploaded: Vec<ServerRecord>,

    /// Set when the pass did not run because another process was draining
    pub skipped: bool,
}

impl DrainReport {
    /// Whether the pass had nothing to do
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    /// Number of entries attempted
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Outcome of trying the cross-process drain lock
enum DrainLock {
    Unconfigured,
    Held(File),
    Busy,
}

/// Drains the offline queue into the remote store
pub struct SyncDrainer {
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteStore>,
    table: String,
    lock_path: Option<PathBuf>,
    /// Pass gate; holds tempIds uploaded but still queued
    gate: Mutex<HashSet<String>>,
}

impl SyncDrainer {
    /// Create a drainer writing to the default table
    pub fn new(queue: Arc<OfflineQueue>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_table(queue, remote, DEFAULT_TABLE)
    }

    /// Create a drainer writing to a specific table
    pub fn with_table(
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteStore>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            remote,
            table: table.into(),
            lock_path: None,
            gate: Mutex::new(HashSet::new()),
        }
    }

    /// Coordinate with other processes through a lock file
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// Run one drain pass
    #[instrument(skip(self), fields(remote = self.remote.name()))]
    pub async fn drain(&self) -> DrainReport {
        let mut unremoved = self.gate.lock().await;

        let _lock = match self.try_lock().await {
            Ok(DrainLock::Held(file)) => Some(file),
            Ok(DrainLock::Unconfigured) => None,
            Ok(DrainLock::Busy) => {
                info!("Another process is draining the queue, skipping pass");
                return DrainReport::skipped();
            }
            Err(e) => {
                error!("Could not take the drain lock, skipping pass: {}", e);
                return DrainReport::skipped();
            }
        };

        let snapshot = self.queue.get_all().await;
        let mut report = DrainReport::default();

        // Forget ids that left the queue some other way (e.g. cleared)
        unremoved.retain(|temp_id| snapshot.iter().any(|entry| entry.temp_id == *temp_id));

        if snapshot.is_empty() {
            return report;
        }

        info!(pending = snapshot.len(), "Draining offline queue");

        for entry in snapshot {
            if unremoved.contains(&entry.temp_id) {
                match self.queue.remove(&entry.temp_id).await {
                    Ok(_) => {
                        info!(temp_id = %entry.temp_id, "Removed previously uploaded entry");
                        unremoved.remove(&entry.temp_id);
                    }
                    Err(e) => {
                        warn!(temp_id = %entry.temp_id, "Still cannot remove uploaded entry: {}", e);
                    }
                }
                continue;
            }

            let payload = entry.to_remote_payload();

            match self.remote.insert(&self.table, &payload).await {
                Ok(record) => {
                    if let Err(e) = self.queue.remove(&entry.temp_id).await {
                        error!(
                            temp_id = %entry.temp_id,
                            "Uploaded but could not remove from queue: {}", e
                        );
                        unremoved.insert(entry.temp_id.clone());
                    }
                    report.succeeded.push(entry.temp_id);
                    report.uploaded.push(record);
                }
                Err(e) => {
                    warn!(temp_id = %entry.temp_id, "Sync failed, keeping queued: {}", e);
                    report.failed.push(entry.temp_id);
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Drain pass finished"
        );

        report
    }

    async fn try_lock(&self) -> Result<DrainLock, StorageError> {
        let Some(path) = self.lock_path.clone() else {
            return Ok(DrainLock::Unconfigured);
        };

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).write(true).open(&path)?;

            match file.try_lock_exclusive() {
                Ok(()) => Ok(DrainLock::Held(file)),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    Ok(DrainLock::Busy)
                }
                Err(e) => Err(StorageError::Lock(e.to_string())),
            }
        })
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
    }
}
