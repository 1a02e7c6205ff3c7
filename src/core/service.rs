//! Intake service: the interface the form talks to.
//!
//! Wires one offline queue, router and drainer over an injected storage
//! backend and remote store. No hidden globals; two services over two
//! stores are fully independent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::adapters::{RemoteError, RemoteStore, DEFAULT_TABLE};
use crate::domain::{FormData, QueuedSubmission, ServerRecord};
use crate::storage::KeyValueStore;

use super::connectivity::ConnectivityMonitor;
use super::drainer::{DrainReport, SyncDrainer};
use super::queue::OfflineQueue;
use super::router::{SubmissionRouter, SubmitResult};

/// Capacity of the drain report channel
const REPORT_BUFFER: usize = 16;

/// Offline-capable submission service
pub struct IntakeService {
    queue: Arc<OfflineQueue>,
    router: SubmissionRouter,
    drainer: Arc<SyncDrainer>,
    remote: Arc<dyn RemoteStore>,
    table: String,
}

impl IntakeService {
    /// Build a service writing to the default table
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_table(store, remote, DEFAULT_TABLE)
    }

    /// Build a service writing to a specific table
    pub fn with_table(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        table: impl Into<String>,
    ) -> Self {
        let table = table.into();
        let queue = Arc::new(OfflineQueue::new(store));
        let router = SubmissionRouter::with_table(queue.clone(), remote.clone(), table.clone());
        let drainer = Arc::new(SyncDrainer::with_table(
            queue.clone(),
            remote.clone(),
            table.clone(),
        ));

        Self {
            queue,
            router,
            drainer,
            remote,
            table,
        }
    }

    /// Share drains with other processes on the same machine: a pass is
    /// skipped while another process holds the lock file
    pub fn with_drain_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.drainer = Arc::new(
            SyncDrainer::with_table(self.queue.clone(), self.remote.clone(), self.table.clone())
                .with_lock_file(path),
        );
        self
    }

    /// The offline queue
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Submit form data given the current connectivity
    pub async fn submit(&self, form: FormData, is_online: bool) -> SubmitResult {
        self.router.submit(form, is_online).await
    }

    /// Run one drain pass now
    pub async fn drain(&self) -> DrainReport {
        self.drainer.drain().await
    }

    /// Pending submissions, oldest first
    pub async fn get_all(&self) -> Vec<QueuedSubmission> {
        self.queue.get_all().await
    }

    /// Submissions already in the remote store, newest first
    pub async fn list_remote(&self) -> Result<Vec<ServerRecord>, RemoteError> {
        self.remote.list(&self.table).await
    }

    /// Drain whenever `monitor` goes from offline to online, and on every
    /// `safety_net` tick while online. If the monitor starts online, one
    /// pass runs right away.
    ///
    /// Non-empty reports are published on the returned channel. Dropping
    /// the receiver does not stop the loop; abort the handle for that.
    pub fn spawn_sync_on_reconnect(
        &self,
        monitor: &dyn ConnectivityMonitor,
        safety_net: Option<Duration>,
    ) -> (mpsc::Receiver<DrainReport>, JoinHandle<()>) {
        let mut online_rx = monitor.subscribe();
        let drainer = self.drainer.clone();
        let (report_tx, report_rx) = mpsc::channel(REPORT_BUFFER);

        let handle = tokio::spawn(async move {
            let mut safety_ticker = safety_net.map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

            let initially_online = *online_rx.borrow_and_update();
            if initially_online {
                run_pass(&drainer, &report_tx).await;
            }

            loop {
                tokio::select! {
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity source closed, stopping sync loop");
                            break;
                        }
                        // Notifications only fire on a flip, so online here means a reconnect
                        let online = *online_rx.borrow_and_update();
                        if online {
                            info!("Back online, syncing queued submissions");
                            run_pass(&drainer, &report_tx).await;
                        } else {
                            info!("Went offline, new submissions will be queued");
                        }
                    }
                    _ = next_tick(&mut safety_ticker) => {
                        let online = *online_rx.borrow();
                        if online {
                            run_pass(&drainer, &report_tx).await;
                        }
                    }
                }
            }
        });

        (report_rx, handle)
    }
}

async fn run_pass(drainer: &SyncDrainer, reports: &mpsc::Sender<DrainReport>) {
    let report = drainer.drain().await;
    if report.is_empty() {
        return;
    }
    if let Err(e) = reports.try_send(report) {
        debug!("Drain report not delivered: {}", e);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fakes::RecordingRemote;
    use crate::core::connectivity::ConnectivityState;
    use crate::storage::MemoryStore;

    fn service(remote: Arc<RecordingRemote>) -> IntakeService {
        IntakeService::new(Arc::new(MemoryStore::new()), remote)
    }

    #[tokio::test]
    async fn test_submit_then_drain() {
        let remote = Arc::new(RecordingRemote::new());
        let service = service(remote.clone());

        let queued = service.submit(FormData::new("Ravi", "Patient"), false).await;
        assert!(queued.is_queued());
        assert_eq!(service.get_all().await.len(), 1);

        let report = service.drain().await;
        assert_eq!(report.succeeded.len(), 1);
        assert!(service.get_all().await.is_empty());
        assert_eq!(remote.payloads()[0].email, "Patient");
    }

    #[tokio::test]
    async fn test_reconnect_triggers_drain() {
        let remote = Arc::new(RecordingRemote::new());
        let service = service(remote.clone());
        let connectivity = ConnectivityState::new(false);

        service.submit(FormData::new("Ravi", "Patient"), false).await;
        let (mut reports, handle) = service.spawn_sync_on_reconnect(&connectivity, None);

        connectivity.set_online(true);
        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert!(service.get_all().await.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_drains_at_start_when_online() {
        let remote = Arc::new(RecordingRemote::new());
        let service = service(remote.clone());
        service.submit(FormData::new("Ravi", "Patient"), false).await;

        let connectivity = ConnectivityState::new(true);
        let (mut reports, handle) = service.spawn_sync_on_reconnect(&connectivity, None);

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.attempted(), 1);
        handle.abort();
    }
}
