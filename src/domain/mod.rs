//! Domain types for voiceform.
//!
//! This module contains the data structures that flow between the form,
//! the offline queue and the remote store.

pub mod submission;

// Re-export commonly used types
pub use submission::{
    FormData, QueuedSubmission, RecordId, RemotePayload, ServerRecord, ValidationError,
};
