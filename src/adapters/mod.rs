//! Adapter interfaces for the remote datastore.
//!
//! The offline queue and drainer only talk to the remote through the
//! `RemoteStore` trait, so tests swap in a scripted double and deployments
//! plug in `SupabaseClient`.

pub mod supabase;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{RemotePayload, ServerRecord};

// Re-export the Supabase adapter
pub use supabase::SupabaseClient;

/// Table the intake form writes to
pub const DEFAULT_TABLE: &str = "form_submissions";

/// Errors returned by remote store adapters
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Remote store returned no rows")]
    EmptyResponse,

    #[error("Remote store not configured: {0}")]
    NotConfigured(String),

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for remote submission stores
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, record: &RemotePayload) -> Result<ServerRecord, RemoteError>;

    /// All rows, newest first
    async fn list(&self, table: &str) -> Result<Vec<ServerRecord>, RemoteError>;

    /// Cheap reachability probe
    async fn health_check(&self) -> Result<(), RemoteError>;
}

/// Stand-in used when no remote is configured. Every call fails, so the
/// device behaves as permanently offline and submissions are queued.
#[derive(Debug, Clone, Default)]
pub struct DisconnectedRemote {
    reason: String,
}

impl DisconnectedRemote {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RemoteStore for DisconnectedRemote {
    fn name(&self) -> &str {
        "disconnected"
    }

    async fn insert(&self, _table: &str, _record: &RemotePayload) -> Result<ServerRecord, RemoteError> {
        Err(RemoteError::NotConfigured(self.reason.clone()))
    }

    async fn list(&self, _table: &str) -> Result<Vec<ServerRecord>, RemoteError> {
        Err(RemoteError::NotConfigured(self.reason.clone()))
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured(self.reason.clone()))
    }
}
