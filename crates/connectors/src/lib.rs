//! Tandem Connectors
//!
//! The two delivery paths a generation can take: the persistent push
//! channel (`channel`) and the one-shot fallback endpoint (`fallback`).
//! Both translate wire traffic into the shared event and error types below.

pub mod channel;
pub mod fallback;

pub use channel::WebSocketChannel;
pub use fallback::HttpFallbackClient;

use async_trait::async_trait;
use tandem_protocol::{ClientFrame, GenerateBody, MessageRecord, ServerEvent};
use thiserror::Error;

/// Errors that can occur in connectors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid server url: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// A failed fallback generation, as surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    pub provider_used: Option<String>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            provider_used: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_used = Some(provider.into());
        self
    }
}

impl From<ConnectorError> for GenerationError {
    fn from(err: ConnectorError) -> Self {
        GenerationError::new(err.to_string())
    }
}

/// Lifecycle of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never connected
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ChannelStatus {
    pub fn is_open(self) -> bool {
        self == ChannelStatus::Open
    }

    /// Whether `send` will deliver or queue rather than drop.
    pub fn accepts_sends(self) -> bool {
        matches!(self, ChannelStatus::Open | ChannelStatus::Connecting)
    }
}

/// Events emitted by the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    StreamStart {
        request_id: Option<String>,
    },
    StreamDelta {
        request_id: Option<String>,
        text: String,
    },
    StreamEnd {
        request_id: Option<String>,
        message: Option<MessageRecord>,
    },
    StreamError {
        request_id: Option<String>,
        detail: String,
        provider_used: Option<String>,
    },
    Closed,
}

impl From<ServerEvent> for ChannelEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::MessageStart { request_id } => ChannelEvent::StreamStart { request_id },
            ServerEvent::Delta {
                request_id,
                content,
            } => ChannelEvent::StreamDelta {
                request_id,
                text: content,
            },
            ServerEvent::MessageEnd {
                request_id,
                message,
            } => ChannelEvent::StreamEnd {
                request_id,
                message,
            },
            ServerEvent::Error {
                request_id,
                detail,
                provider_used,
            } => ChannelEvent::StreamError {
                request_id,
                detail,
                provider_used,
            },
        }
    }
}

/// The push channel as seen by the coordinator.
///
/// `send` never reports failure: a frame sent on a closing or closed
/// channel is lost, and the caller learns about it through its own timer.
pub trait TransportChannel: Send + Sync {
    /// Open the connection for a conversation. Idempotent while connecting or open.
    fn connect(&self, conversation_id: &str, credentials: Option<&str>);

    fn status(&self) -> ChannelStatus;

    fn is_open(&self) -> bool {
        self.status().is_open()
    }

    fn send(&self, frame: &ClientFrame);

    fn close(&self);
}

/// A completed user/assistant exchange from the fallback path
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user: MessageRecord,
    pub assistant: MessageRecord,
    pub provider_used: Option<String>,
}

/// One-shot generation that returns a complete exchange or fails outright.
#[async_trait]
pub trait FallbackClient: Send + Sync {
    async fn generate(
        &self,
        conversation_id: &str,
        body: GenerateBody,
    ) -> Result<Exchange, GenerationError>;
}
