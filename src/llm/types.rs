use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Substrings that mark an otherwise untyped backend error as quota related.
pub const RATE_LIMIT_MARKERS: &[&str] = &["429", "quota", "rate", "limit", "exhausted"];

/// Supported model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderType {
    #[default]
    #[serde(rename = "vertex_ai")]
    VertexAi,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderType {
    pub const ALL: [ProviderType; 2] = [ProviderType::VertexAi, ProviderType::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::VertexAi => "vertex_ai",
            ProviderType::OpenAi => "openai",
        }
    }

    /// Whether structured output must pass the strict schema transform.
    pub fn requires_strict_schema(&self) -> bool {
        matches!(self, ProviderType::OpenAi)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "vertex_ai" | "vertexai" | "vertex" | "gemini" => Ok(ProviderType::VertexAi),
            "openai" | "open_ai" => Ok(ProviderType::OpenAi),
            other => Err(LlmError::Configuration(format!(
                "unknown provider '{}', expected one of: vertex_ai, openai",
                other
            ))),
        }
    }
}

/// Normalized reason a backend stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    ContentFilter,
    Recitation,
    Other,
    Unspecified,
}

impl FinishReason {
    /// Policy rejections: reissuing the same prompt is expected to fail again.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            FinishReason::Safety | FinishReason::ContentFilter | FinishReason::Recitation
        )
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FinishReason::Stop => "stop",
            FinishReason::MaxTokens => "max_tokens",
            FinishReason::Safety => "safety",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Recitation => "recitation",
            FinishReason::Other => "other",
            FinishReason::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Adds another call's counters. The total is always recomputed from the parts.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens = self.input_tokens + self.output_tokens;
    }
}

/// Backend-neutral generation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub model: String,
    /// Raw backend payload, kept for debugging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    /// Already-parsed object for backends that return native structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
}

impl LlmResponse {
    pub fn new(text: impl Into<String>, finish_reason: FinishReason, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            finish_reason,
            usage,
            model: String::new(),
            raw: None,
            parsed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

impl ResponseFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ResponseFormat::Text => "text/plain",
            ResponseFormat::Json => "application/json",
        }
    }
}

/// Everything a factory needs to open a session for one persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,
    pub model: String,
    pub temperature: f32,
    pub system_instruction: Option<String>,
    pub response_format: ResponseFormat,
    /// Backend-ready schema document, already passed through the schema adapter.
    pub response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider layer errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        reset_time: Option<DateTime<Utc>>,
    },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Provider not registered: {0}")]
    ProviderNotFound(ProviderType),
    #[error("Provider not initialized: {0}")]
    ProviderNotInitialized(String),
    #[error("Chat exchange has not been started")]
    SessionNotStarted,
    #[error("Generation blocked ({reason}): {message}")]
    Blocked {
        reason: FinishReason,
        message: String,
    },
    #[error("Empty response from model (finish reason: {0})")]
    EmptyResponse(FinishReason),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Context too large: {current} > {max}")]
    ContextTooLarge { current: u64, max: u64 },
    #[error("Provider-specific error: {0}")]
    ProviderSpecific(String),
}

impl LlmError {
    /// Explicit rate-limit signal, or a message carrying a quota marker.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimit { .. } => true,
            LlmError::Network(msg)
            | LlmError::ServiceUnavailable(msg)
            | LlmError::InvalidResponse(msg)
            | LlmError::ProviderSpecific(msg) => {
                let msg = msg.to_lowercase();
                RATE_LIMIT_MARKERS.iter().any(|marker| msg.contains(marker))
            }
            _ => false,
        }
    }

    /// Configuration and policy failures are never worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimit { .. }
            | LlmError::Network(_)
            | LlmError::ServiceUnavailable(_)
            | LlmError::EmptyResponse(_)
            | LlmError::InvalidResponse(_)
            | LlmError::ProviderSpecific(_) => true,
            LlmError::Authentication(_)
            | LlmError::Configuration(_)
            | LlmError::ProviderNotFound(_)
            | LlmError::ProviderNotInitialized(_)
            | LlmError::SessionNotStarted
            | LlmError::Blocked { .. }
            | LlmError::ContextTooLarge { .. } => false,
        }
    }

    /// Maps an HTTP status from either backend onto the error taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim().to_string();
        match status {
            429 => LlmError::RateLimit {
                message: body,
                reset_time: None,
            },
            401 | 403 => LlmError::Authentication(body),
            413 => LlmError::ContextTooLarge { current: 0, max: 0 },
            500..=599 => LlmError::ServiceUnavailable(format!("HTTP {}: {}", status, body)),
            _ => LlmError::InvalidResponse(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return LlmError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

/// Crude length based estimate used whenever exact counting is unavailable.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> u64 {
    (text.chars().count() as f64 / chars_per_token).ceil() as u64
}
