//! Supabase (PostgREST) adapter for the submissions table.
//!
//! Inserts go to `POST {url}/rest/v1/{table}` with
//! `Prefer: return=representation`, so the response body is the inserted
//! row (as a one-element array) including the server-assigned id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use serde::Deserialize;
use tracing::debug;

use super::{RemoteError, RemoteStore};
use crate::domain::{RemotePayload, ServerRecord};

/// PostgREST error body
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    details: Option<String>,
}

/// Supabase REST client
pub struct SupabaseClient {
    /// Project URL without trailing slash
    base_url: String,
    /// Public anon key (sent as both `apikey` and bearer token)
    anon_key: String,
    /// HTTP client
    client: reqwest::Client,
}

impl SupabaseClient {
    /// Create a new client. `timeout` bounds every request.
    pub fn new(url: &str, anon_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        if url.trim().is_empty() {
            return Err(RemoteError::NotConfigured("missing Supabase URL".to_string()));
        }
        if anon_key.trim().is_empty() {
            return Err(RemoteError::NotConfigured("missing Supabase anon key".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: url.trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.trim().to_string(),
            client,
        })
    }

    /// Build the REST URL for a table
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// Turn non-2xx responses into `RemoteError::Api`
    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: api_error_message(&body),
        })
    }
}

/// Best-effort extraction of a PostgREST error message
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            message: Some(message),
            details,
        }) => match details {
            Some(details) if !details.is_empty() => format!("{} ({})", message, details),
            _ => message,
        },
        _ if body.trim().is_empty() => "no response body".to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn insert(&self, table: &str, record: &RemotePayload) -> Result<ServerRecord, RemoteError> {
        let url = self.table_url(table);
        debug!(%url, "Inserting submission");

        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(&[record])
            .send()
            .await?;

        let rows: Vec<ServerRecord> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(RemoteError::EmptyResponse)
    }

    async fn list(&self, table: &str) -> Result<Vec<ServerRecord>, RemoteError> {
        let url = self.table_url(table);
        debug!(%url, "Listing submissions");

        let response = self
            .authed(self.client.get(&url))
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;

        // Any answer short of a server error means the network path is up
        if response.status().is_server_error() {
            return Err(RemoteError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
