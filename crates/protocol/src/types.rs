//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const MAX_TOKENS_CEILING: u32 = 2048;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Comparison variant of a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    /// Wire request id for this variant.
    pub fn as_request_id(self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }

    /// Request token for one submission: `A-3`, `B-3`.
    pub fn request_token(self, sequence: u64) -> String {
        format!("{}-{sequence}", self.as_request_id())
    }

    /// Resolve a variant from an inbound `request_id`, bare (`B`) or
    /// tokenized (`B-3`).
    ///
    /// Anything that is not recognizably `B` resolves to `A`, including an
    /// absent or malformed id.
    pub fn from_request_id(request_id: Option<&str>) -> Variant {
        let prefix = request_id.map(|id| match id.trim().split_once('-') {
            Some((prefix, _)) => prefix,
            None => id.trim(),
        });
        match prefix {
            Some(p) if p.eq_ignore_ascii_case("b") => Variant::B,
            _ => Variant::A,
        }
    }
}

/// Sequence number carried by a tokenized `request_id`, if any.
pub fn request_sequence(request_id: &str) -> Option<u64> {
    let (_, sequence) = request_id.trim().split_once('-')?;
    sequence.parse().ok()
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_request_id())
    }
}

/// A persisted message as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
    pub created_at: String,
}

/// Sampling parameters for one completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl GenerationParams {
    /// Clamp every field into its accepted range.
    ///
    /// NaN temperature/top_p fall back to their defaults.
    pub fn clamped(mut self) -> Self {
        self.temperature = clamp_unit(self.temperature, DEFAULT_TEMPERATURE);
        self.top_p = clamp_unit(self.top_p, DEFAULT_TOP_P);
        self.max_tokens = self.max_tokens.clamp(1, MAX_TOKENS_CEILING);
        self.model = self
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self
    }
}

fn clamp_unit(value: f64, default: f64) -> f64 {
    if value.is_nan() {
        default
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Body of a fallback generate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Successful fallback generate response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub user: MessageRecord,
    pub assistant: MessageRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
}

/// Error body returned by the fallback endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
}

impl ErrorBody {
    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Human-readable message, preferring `detail` over `error`.
    pub fn message(&self) -> Option<&str> {
        self.detail
            .as_deref()
            .or(self.error.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}

/// Body of a plain message append (no generation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageBody {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// Body of a conversation create call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateConversationBody {
    #[serde(default)]
    pub title: String,
}

/// Conversation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}
