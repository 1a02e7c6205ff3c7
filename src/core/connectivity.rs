//! Connectivity monitoring.
//!
//! The core never polls a global "am I online" flag. Callers hand
//! connectivity to `submit` explicitly, and the reconnect loop subscribes
//! to a `ConnectivityMonitor` for offline→online transitions.
//!
//! - `ConnectivityState`: a settable online flag backed by a watch channel
//! - `ProbeMonitor`: feeds a `ConnectivityState` from periodic remote probes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::adapters::RemoteStore;

/// Source of online/offline state and its transitions
pub trait ConnectivityMonitor: Send + Sync {
    /// Current state
    fn is_online(&self) -> bool;

    /// Receiver notified whenever the state flips
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Settable connectivity flag
#[derive(Debug, Clone)]
pub struct ConnectivityState {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityState {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Update the state. Subscribers are only notified on an actual change;
    /// returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }
}

impl ConnectivityMonitor for ConnectivityState {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Derives connectivity from remote health checks on an interval
pub struct ProbeMonitor {
    state: ConnectivityState,
    handle: JoinHandle<()>,
}

impl ProbeMonitor {
    /// Start probing. The first probe runs immediately.
    pub fn spawn(remote: Arc<dyn RemoteStore>, interval: Duration) -> Self {
        let state = ConnectivityState::new(false);
        let probe_state = state.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let online = probe_once(remote.as_ref()).await;
                if probe_state.set_online(online) {
                    info!(online, remote = remote.name(), "Connectivity changed");
                }
            }
        });

        Self { state, handle }
    }

    /// Underlying settable state
    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    /// Stop probing
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ProbeMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl ConnectivityMonitor for ProbeMonitor {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// One reachability probe
pub async fn probe_once(remote: &dyn RemoteStore) -> bool {
    match remote.health_check().await {
        Ok(()) => true,
        Err(e) => {
            debug!(remote = remote.name(), "Probe failed: {}", e);
            false
        }
    }
}
