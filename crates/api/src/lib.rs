//! The chat service's request/response endpoints.
//!
//! Everything real-time rides the socket; these four calls cover identity,
//! the roster bulk load, history pages, and the mark-seen side effect.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use burrow_core::config::ClientConfig;
use burrow_core::types::{Contact, CurrentUser};

/// Wire value for "no cursor yet, give me the latest page".
const START_SENTINEL: i64 = -1;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {endpoint}")]
    Status { endpoint: &'static str, status: u16 },
}

/// One message as served by the history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub is_outgoing: bool,
}

#[derive(Serialize)]
struct PageRequest {
    conversation_id: i64,
    start_id: i64,
    n_message: u32,
}

#[derive(Serialize)]
struct MarkSeenRequest {
    conversation_id: i64,
}

pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Identity of the authenticated user (session bootstrap is the host
    /// application's job; this only reads the result).
    pub async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        self.post_json("/me", &()).await
    }

    /// The full roster with presence and last-message metadata.
    pub async fn recent_contacts(&self) -> Result<Vec<Contact>, ApiError> {
        let contacts: Option<Vec<Contact>> = self.post_json("/recent", &()).await?;
        Ok(contacts.unwrap_or_default())
    }

    /// One page of history strictly older than `start_id`, newest first.
    /// `None` asks for the latest page. An empty page means the history is
    /// exhausted.
    pub async fn conversation_page(
        &self,
        conversation_id: i64,
        start_id: Option<i64>,
        page_size: u32,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        let request = PageRequest {
            conversation_id,
            start_id: start_id.unwrap_or(START_SENTINEL),
            n_message: page_size,
        };
        let records: Option<Vec<MessageRecord>> =
            self.post_json("/conversation", &request).await?;
        Ok(records.unwrap_or_default())
    }

    /// Mark a conversation seen. Callers treat this as fire-and-forget.
    pub async fn mark_seen(&self, conversation_id: i64) -> Result<(), ApiError> {
        let endpoint = "/mark-seen";
        let response = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(&MarkSeenRequest { conversation_id })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn post_json<B, R>(&self, endpoint: &'static str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        debug!(endpoint, "chat api request");
        let response = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}
