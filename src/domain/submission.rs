//! Intake form submissions.
//!
//! A submission has three shapes over its life:
//! - `FormData`: what the user typed or dictated
//! - `QueuedSubmission`: a `FormData` held in the offline queue, stamped
//!   with a local `tempId` and capture time
//! - `ServerRecord`: the row the remote store returned after insert
//!
//! The remote table predates the `role` field and has no column for it;
//! `role` travels in the `email` column instead. `RemotePayload` is the only
//! place that mapping happens, so the immediate and deferred paths agree.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local validation failures (never reach the queue or the network)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Field values captured by the intake form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredForm")]
pub struct FormData {
    /// Name of the person the intake is for
    pub name: String,

    /// Relationship to the household, e.g. "Head of Family" or "Patient"
    pub role: String,

    pub phone: Option<String>,
    pub address: Option<String>,
    pub message: Option<String>,
}

/// Form fields as found in storage. Older entries carry the role under
/// `email`, some carry both; a non-empty `role` wins.
#[derive(Deserialize)]
struct StoredForm {
    name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<StoredForm> for FormData {
    fn from(stored: StoredForm) -> Self {
        let role = stored
            .role
            .filter(|role| !role.is_empty())
            .or(stored.email)
            .unwrap_or_default();

        Self {
            name: stored.name,
            role,
            phone: stored.phone.and_then(non_blank),
            address: stored.address.and_then(non_blank),
            message: stored.message.and_then(non_blank),
        }
    }
}

impl FormData {
    /// Create form data with the two required fields
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    /// Set the phone number (blank input clears it)
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = non_blank(phone.into());
        self
    }

    /// Set the address (blank input clears it)
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = non_blank(address.into());
        self
    }

    /// Set the free-text message (blank input clears it)
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = non_blank(message.into());
        self
    }

    /// Check the required fields. Whitespace-only counts as missing, since
    /// dictation often yields a lone space.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.role.trim().is_empty() {
            return Err(ValidationError::MissingField("role"));
        }
        Ok(())
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// A submission waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    #[serde(flatten)]
    pub form: FormData,

    /// Locally unique id, a millisecond timestamp string assigned at enqueue
    #[serde(rename = "tempId")]
    pub temp_id: String,

    /// When the submission was captured offline
    pub created_at: DateTime<Utc>,
}

impl QueuedSubmission {
    /// Build the insert payload, keeping the original capture time
    pub fn to_remote_payload(&self) -> RemotePayload {
        RemotePayload {
            created_at: Some(self.created_at),
            ..RemotePayload::from_form(&self.form)
        }
    }
}

/// Row shape sent to the `form_submissions` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub name: String,

    /// Carries the form's `role`
    pub email: String,

    pub phone: Option<String>,
    pub address: Option<String>,
    pub message: Option<String>,

    /// Only set on the deferred path; the server stamps immediate inserts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RemotePayload {
    /// Map form fields onto the remote schema (`role` goes into `email`)
    pub fn from_form(form: &FormData) -> Self {
        Self {
            name: form.name.clone(),
            email: form.role.clone(),
            phone: form.phone.clone(),
            address: form.address.clone(),
            message: form.message.clone(),
            created_at: None,
        }
    }
}

/// Server-assigned row id (numeric or uuid depending on the table)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// A row as stored by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: RecordId,

    pub name: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    /// Server timestamp, kept verbatim (timestamptz or plain timestamp)
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ServerRecord {
    /// The role value, read back out of the `email` column
    pub fn role(&self) -> Option<&str> {
        self.email.as_deref()
    }
}
