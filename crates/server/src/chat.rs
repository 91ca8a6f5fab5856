//! Generation shared by the fallback endpoint and the push channel.
//!
//! The user message is stored before the provider runs, so a provider
//! failure leaves it in the history.

use std::sync::Arc;

use tandem_protocol::{ErrorBody, GenerationParams, MessageRecord};
use thiserror::Error;
use tracing::{info, warn};

use crate::persistence::{NewMessage, Store, StoreError};
use crate::provider::{ProviderError, ReplyProvider};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("content is required")]
    EmptyContent,

    #[error("conversation not found")]
    NotFound,

    #[error("{provider} provider failed: {source}")]
    Provider {
        provider: &'static str,
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerateError {
    /// Wire shape shared by the HTTP error body and the push `error` event.
    pub fn body(&self) -> ErrorBody {
        match self {
            GenerateError::EmptyContent | GenerateError::NotFound => ErrorBody::detail(self.to_string()),
            GenerateError::Provider { provider, source } => {
                let detail = match source {
                    ProviderError::Unavailable(_) => {
                        format!("{} provider not available", display_name(provider))
                    }
                    ProviderError::Request(_) => {
                        format!("{} provider request failed", display_name(provider))
                    }
                };
                ErrorBody {
                    detail: Some(detail),
                    error: Some(source.to_string()),
                    provider_used: Some(provider.to_string()),
                }
            }
            GenerateError::Store(e) => ErrorBody {
                detail: Some("internal error".to_string()),
                error: Some(e.to_string()),
                provider_used: None,
            },
        }
    }
}

fn display_name(provider: &str) -> &str {
    match provider {
        "openai" => "OpenAI",
        "echo" => "Echo",
        other => other,
    }
}

/// Parse a path id; anything non-numeric is simply not found.
pub fn parse_conversation_id(raw: &str) -> Result<i64, GenerateError> {
    raw.trim().parse().map_err(|_| GenerateError::NotFound)
}

pub async fn ensure_conversation(store: &Store, conversation_id: i64) -> Result<(), GenerateError> {
    match store.get_conversation(conversation_id).await? {
        Some(_) => Ok(()),
        None => Err(GenerateError::NotFound),
    }
}

/// Validate and store the user's message.
pub async fn accept_user_message(
    store: &Store,
    conversation_id: i64,
    content: &str,
) -> Result<MessageRecord, GenerateError> {
    if content.trim().is_empty() {
        return Err(GenerateError::EmptyContent);
    }
    ensure_conversation(store, conversation_id).await?;
    Ok(store
        .append_message(conversation_id, NewMessage::user(content))
        .await?)
}

/// Run the provider over the stored history and store its reply.
pub async fn produce_reply(
    store: &Store,
    conversation_id: i64,
    params: &GenerationParams,
    provider: Arc<dyn ReplyProvider>,
) -> Result<MessageRecord, GenerateError> {
    let history = store.list_messages(conversation_id).await?;
    let reply = match provider.reply(&history, params).await {
        Ok(reply) => reply,
        Err(source) => {
            warn!(
                component = "chat",
                event = "chat.provider.failed",
                conversation_id,
                provider = provider.name(),
                error = %source,
                "Provider failed"
            );
            return Err(GenerateError::Provider {
                provider: provider.name(),
                source,
            });
        }
    };

    let assistant = store
        .append_message(
            conversation_id,
            NewMessage {
                role: tandem_protocol::Role::Assistant,
                content: reply.content,
                model: reply.model,
                prompt_tokens: reply.prompt_tokens,
                completion_tokens: reply.completion_tokens,
            },
        )
        .await?;
    info!(
        component = "chat",
        event = "chat.reply.stored",
        conversation_id,
        message_id = assistant.id,
        provider = provider.name(),
        "Reply stored"
    );
    Ok(assistant)
}

/// Split a reply into word-sized chunks that concatenate back to it.
pub fn word_chunks(content: &str) -> Vec<&str> {
    content.split_inclusive(' ').collect()
}
