//! voiceform - Offline-first sync engine for a voice intake form
//!
//! The form captures a handful of fields (name, role, phone, address,
//! message), usually by dictation, and writes them to a remote
//! `form_submissions` table. When the device is offline, submissions are
//! held in a durable local queue and drained to the remote store as soon
//! as connectivity returns.
//!
//! # Architecture
//!
//! ```text
//! form ──► SubmissionRouter ──online──► RemoteStore
//!                 │
//!              offline
//!                 ▼
//!           OfflineQueue ──(reconnect)──► SyncDrainer ──► RemoteStore
//!                 │
//!           KeyValueStore (file / sqlite / memory)
//! ```
//!
//! # Modules
//!
//! - `adapters`: Remote store integrations (Supabase)
//! - `core`: Queue, router, drainer, connectivity, service facade
//! - `domain`: Submission data structures
//! - `storage`: Key-value backends for the queue
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit (queued automatically when the remote is unreachable)
//! voiceform submit --name Ravi --role Patient
//!
//! # Show queued submissions
//! voiceform pending
//!
//! # Push the queue now
//! voiceform sync
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod storage;

// Re-export main types at crate root for convenience
pub use adapters::{RemoteError, RemoteStore, SupabaseClient};
pub use core::{
    ConnectivityMonitor, ConnectivityState, DrainReport, IntakeService, OfflineQueue,
    ProbeMonitor, SubmissionRouter, SubmitError, SubmitResult, SyncDrainer,
};
pub use domain::{FormData, QueuedSubmission, RemotePayload, ServerRecord};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore, StorageError};
