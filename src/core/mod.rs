//! Core offline-sync logic.
//!
//! This module contains:
//! - OfflineQueue: Durable local queue of pending submissions
//! - SubmissionRouter: Upload-now vs queue decision
//! - SyncDrainer: Flushes the queue to the remote store
//! - Connectivity: Online/offline state and transitions
//! - IntakeService: Facade plus the reconnect-triggered sync loop

pub mod connectivity;
pub mod drainer;
pub mod queue;
pub mod router;
pub mod service;

// Re-export commonly used types
pub use connectivity::{probe_once, ConnectivityMonitor, ConnectivityState, ProbeMonitor};
pub use drainer::{DrainReport, SyncDrainer};
pub use queue::{OfflineQueue, QueueError, QueueStatus, QUEUE_KEY};
pub use router::{SubmissionRouter, SubmitError, SubmitResult};
pub use service::IntakeService;
