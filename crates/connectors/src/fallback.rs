//! Fallback HTTP client
//!
//! Issues the one-shot `generate` call used when the push channel is
//! unavailable or too slow to start. Returns a complete exchange or a
//! [`GenerationError`], never partial output.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tandem_protocol::{
    ConversationRecord, ErrorBody, GenerateBody, GenerateResponse, MessageRecord,
};
use tracing::{debug, warn};

use crate::{ConnectorError, Exchange, FallbackClient, GenerationError};

/// Upper bound on one fallback call, provider time included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct HttpFallbackClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<String>,
}

impl HttpFallbackClient {
    pub fn new(base_url: &str, credentials: Option<String>) -> Result<Self, ConnectorError> {
        Self::with_timeout(base_url, credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        credentials: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConnectorError::InvalidUrl(base_url));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            credentials: credentials.filter(|c| !c.is_empty()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.credentials {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Create a conversation so a session has an id to attach to.
    pub async fn create_conversation(&self) -> Result<ConversationRecord, ConnectorError> {
        let response = self
            .request(reqwest::Method::POST, "/api/chat/conversations/")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                message: body.message().unwrap_or("request failed").to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Persisted history of a conversation, oldest first.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>, ConnectorError> {
        let path = format!(
            "/api/chat/conversations/{}/messages/",
            urlencoding::encode(conversation_id)
        );
        let response = self.request(reqwest::Method::GET, &path).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                message: body.message().unwrap_or("request failed").to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FallbackClient for HttpFallbackClient {
    async fn generate(
        &self,
        conversation_id: &str,
        body: GenerateBody,
    ) -> Result<Exchange, GenerationError> {
        let path = format!(
            "/api/chat/conversations/{}/generate/",
            urlencoding::encode(conversation_id)
        );
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::from(ConnectorError::from(e)))?;

        let status = response.status();
        if status.is_success() {
            let payload: GenerateResponse = response
                .json()
                .await
                .map_err(|e| GenerationError::from(ConnectorError::from(e)))?;
            debug!(
                component = "fallback",
                event = "fallback.generate.ok",
                conversation_id = %conversation_id,
                provider_used = payload.provider_used.as_deref().unwrap_or("unknown"),
                "Fallback generate succeeded"
            );
            return Ok(Exchange {
                user: payload.user,
                assistant: payload.assistant,
                provider_used: payload.provider_used,
            });
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let err = GenerationError {
            message: body
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| status_line(status)),
            provider_used: body.provider_used,
        };
        warn!(
            component = "fallback",
            event = "fallback.generate.failed",
            conversation_id = %conversation_id,
            status = status.as_u16(),
            error = %err,
            "Fallback generate failed"
        );
        Err(err)
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}
