//! Submission routing: upload now or queue for later.
//!
//! Connectivity is an argument, not something the router looks up, so the
//! decision point is explicit and testable. Being online but failing is a
//! different situation from being offline: a failed upload is reported to
//! the caller and is NOT quietly queued.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::{RemoteError, RemoteStore, DEFAULT_TABLE};
use crate::domain::{FormData, QueuedSubmission, RemotePayload, ServerRecord, ValidationError};

use super::queue::{OfflineQueue, QueueError};

/// Why a submission did not go through
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upload failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Could not save offline: {0}")]
    Queue(#[from] QueueError),
}

impl SubmitError {
    /// Whether trying the same submission again could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

/// Outcome of a submission
#[derive(Debug)]
pub enum SubmitResult {
    /// Inserted remotely
    Uploaded(ServerRecord),

    /// Saved to the offline queue
    Queued(QueuedSubmission),

    /// Rejected locally or failed to upload
    Failed(SubmitError),
}

impl SubmitResult {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&SubmitError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Short status line for the form
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Uploaded(_) => "Form submitted successfully!",
            Self::Queued(_) => "Saved offline. Will upload when online.",
            Self::Failed(SubmitError::Validation(_)) => "Name and role are required.",
            Self::Failed(_) => "Error submitting form. Please try again.",
        }
    }
}

/// Routes submissions to the remote store or the offline queue
pub struct SubmissionRouter {
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteStore>,
    table: String,
}

impl SubmissionRouter {
    /// Create a router writing to the default table
    pub fn new(queue: Arc<OfflineQueue>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_table(queue, remote, DEFAULT_TABLE)
    }

    /// Create a router writing to a specific table
    pub fn with_table(
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteStore>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            remote,
            table: table.into(),
        }
    }

    /// Submit form data given the current connectivity
    #[instrument(skip(self, form), fields(online = is_online))]
    pub async fn submit(&self, form: FormData, is_online: bool) -> SubmitResult {
        if let Err(e) = form.validate() {
            warn!("Submission rejected: {}", e);
            return SubmitResult::Failed(e.into());
        }

        if !is_online {
            return match self.queue.save(form).await {
                Ok(queued) => {
                    info!(temp_id = %queued.temp_id, "Offline, submission queued");
                    SubmitResult::Queued(queued)
                }
                Err(e) => {
                    warn!("Failed to queue submission: {}", e);
                    SubmitResult::Failed(e.into())
                }
            };
        }

        let payload = RemotePayload::from_form(&form);
        match self.remote.insert(&self.table, &payload).await {
            Ok(record) => {
                info!(id = %record.id, remote = self.remote.name(), "Submission uploaded");
                SubmitResult::Uploaded(record)
            }
            Err(e) => {
                warn!(remote = self.remote.name(), "Upload failed: {}", e);
                SubmitResult::Failed(e.into())
            }
        }
    }
}
