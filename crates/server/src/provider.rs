//! Reply providers
//!
//! A provider turns conversation history into one assistant reply. `echo`
//! is always available; `openai` needs `OPENAI_API_KEY`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tandem_protocol::{GenerationParams, MessageRecord, Role};
use thiserror::Error;
use tracing::warn;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider cannot be used at all (missing key, bad config).
    #[error("{0}")]
    Unavailable(String),

    /// The provider was reached but the call failed.
    #[error("{0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

#[async_trait]
pub trait ReplyProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reply(
        &self,
        history: &[MessageRecord],
        params: &GenerationParams,
    ) -> Result<Reply, ProviderError>;
}

/// Repeats the latest user message.
pub struct EchoProvider;

#[async_trait]
impl ReplyProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn reply(
        &self,
        history: &[MessageRecord],
        _params: &GenerationParams,
    ) -> Result<Reply, ProviderError> {
        let content = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(no input)".to_string());
        Ok(Reply {
            content,
            model: "echo".to_string(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }
}

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, base_url: &str, default_model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
        }
    }

    /// `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_CHAT_MODEL`.
    pub fn from_env() -> Self {
        let base = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string());
        let model =
            std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| OPENAI_DEFAULT_MODEL.to_string());
        Self::new(std::env::var("OPENAI_API_KEY").ok(), &base, &model)
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

#[async_trait]
impl ReplyProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn reply(
        &self,
        history: &[MessageRecord],
        params: &GenerationParams,
    ) -> Result<Reply, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::Unavailable(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        };
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": model,
                "messages": messages,
                "temperature": params.temperature,
                "top_p": params.top_p,
                "max_tokens": params.max_tokens,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                component = "provider",
                event = "provider.openai.failed",
                status = status.as_u16(),
                body_preview = %body.chars().take(240).collect::<String>(),
                "OpenAI request failed"
            );
            return Err(ProviderError::Request(format!("OpenAI returned {status}")));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string();
        let usage = completion.usage;
        Ok(Reply {
            content,
            model: completion.model.unwrap_or(model),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

/// The providers a request can pick from.
#[derive(Clone)]
pub struct Providers {
    pub echo: Arc<dyn ReplyProvider>,
    pub openai: Arc<dyn ReplyProvider>,
    /// Server-wide default when the request does not force one.
    pub use_openai: bool,
}

impl Providers {
    pub fn new(use_openai: bool) -> Self {
        Self {
            echo: Arc::new(EchoProvider),
            openai: Arc::new(OpenAiProvider::from_env()),
            use_openai,
        }
    }

    /// `?provider=openai` forces OpenAI; otherwise the server default applies.
    pub fn select(&self, requested: Option<&str>) -> Arc<dyn ReplyProvider> {
        let forced = requested
            .map(|p| p.trim().eq_ignore_ascii_case("openai"))
            .unwrap_or(false);
        if forced || self.use_openai {
            self.openai.clone()
        } else {
            self.echo.clone()
        }
    }
}
