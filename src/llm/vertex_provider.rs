//! Vertex AI (Gemini) backend
//!
//! Talks to the `generateContent` REST endpoint in loose JSON mode: the response
//! schema is passed through as a plain JSON Schema document.

use crate::config::VertexAiConfig;
use crate::env;
use crate::llm::provider::{ProviderFactory, ProviderSession};
use crate::llm::types::{
    ChatMessage, ChatRole, FinishReason, LlmError, LlmResponse, PersonaConfig, ProviderType,
    ResponseFormat, TokenUsage, estimate_tokens,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }

    fn from_message(message: &ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "model",
        };
        Self::text(Some(role), &message.content)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: u64,
}

/// Maps a Vertex `finishReason` onto the normalized enum.
pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("FINISH_REASON_UNSPECIFIED") => FinishReason::Unspecified,
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("SAFETY") => FinishReason::Safety,
        Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") | Some("SPII") => {
            FinishReason::ContentFilter
        }
        Some("RECITATION") => FinishReason::Recitation,
        Some(_) => FinishReason::Other,
    }
}

/// Converts a raw `generateContent` payload into an [`LlmResponse`].
pub fn map_response(payload: serde_json::Value, model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: GenerateContentResponse = serde_json::from_value(payload.clone())
        .map_err(|e| LlmError::InvalidResponse(format!("unexpected Vertex AI payload: {}", e)))?;

    let usage = parsed
        .usage_metadata
        .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
        .unwrap_or_default();

    let (text, finish_reason) = match parsed.candidates.first() {
        Some(candidate) => {
            let text = candidate
                .content
                .as_ref()
                .map(|content| {
                    content
                        .parts
                        .iter()
                        .filter_map(|part| part.text.as_deref())
                        .collect::<String>()
                })
                .unwrap_or_default();
            (text, map_finish_reason(candidate.finish_reason.as_deref()))
        }
        None => {
            let blocked = parsed
                .prompt_feedback
                .and_then(|feedback| feedback.block_reason)
                .is_some();
            let reason = if blocked {
                FinishReason::Safety
            } else {
                FinishReason::Unspecified
            };
            (String::new(), reason)
        }
    };

    Ok(LlmResponse {
        text,
        finish_reason,
        usage,
        model: parsed.model_version.unwrap_or_else(|| model.to_string()),
        raw: Some(payload),
        parsed: None,
    })
}

/// Shared HTTP client bound to one project and location
#[derive(Debug)]
pub struct VertexClient {
    http: reqwest::Client,
    base: Url,
    project_id: String,
    location: String,
    access_token: String,
}

impl VertexClient {
    pub fn from_config(config: &VertexAiConfig) -> Result<Self, LlmError> {
        let project_id = config.project_id.clone().ok_or_else(|| {
            LlmError::Configuration(format!(
                "Vertex AI project id is not set (config `vertex_ai.project_id` or {})",
                env::vars::GOOGLE_CLOUD_PROJECT
            ))
        })?;
        let access_token = config.access_token.clone().ok_or_else(|| {
            LlmError::Configuration(format!(
                "Vertex AI access token is not set (config `vertex_ai.access_token` or {})",
                env::vars::VERTEX_AI_ACCESS_TOKEN
            ))
        })?;

        let mut endpoint = config.endpoint();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base = Url::parse(&endpoint).map_err(|e| {
            LlmError::Configuration(format!("invalid Vertex AI endpoint '{}': {}", endpoint, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            project_id,
            location: config.location.clone(),
            access_token,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> Result<Url, LlmError> {
        let path = format!(
            "v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.project_id, self.location, model, method
        );
        self.base
            .join(&path)
            .map_err(|e| LlmError::Configuration(format!("invalid model path '{}': {}", path, e)))
    }

    async fn post<B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<serde_json::Value, LlmError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }
        Ok(response.json().await?)
    }

    async fn generate_content(
        &self,
        persona: &PersonaConfig,
        contents: Vec<Content>,
    ) -> Result<LlmResponse, LlmError> {
        let request = GenerateContentRequest {
            contents,
            system_instruction: persona
                .system_instruction
                .as_deref()
                .map(|instruction| Content::text(None, instruction)),
            generation_config: GenerationConfig {
                temperature: persona.temperature,
                response_mime_type: persona.response_format.mime_type(),
                response_json_schema: match persona.response_format {
                    ResponseFormat::Json => persona.response_schema.clone(),
                    ResponseFormat::Text => None,
                },
            },
        };

        let url = self.model_url(&persona.model, "generateContent")?;
        let payload = self.post(url, &request).await?;
        map_response(payload, &persona.model)
    }

    async fn count_tokens(&self, text: &str, model: &str) -> Result<u64, LlmError> {
        let url = self.model_url(model, "countTokens")?;
        let body = serde_json::json!({ "contents": [Content::text(Some("user"), text)] });
        let payload = self.post(url, &body).await?;
        let parsed: CountTokensResponse = serde_json::from_value(payload)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.total_tokens)
    }
}

pub struct VertexAiFactory {
    config: VertexAiConfig,
    client: OnceCell<Arc<VertexClient>>,
}

impl VertexAiFactory {
    pub fn new(config: VertexAiConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<Arc<VertexClient>, LlmError> {
        self.client
            .get_or_try_init(|| async {
                let client = VertexClient::from_config(&self.config)?;
                info!(
                    "Vertex AI client ready (project: {}, location: {})",
                    client.project_id, client.location
                );
                Ok::<_, LlmError>(Arc::new(client))
            })
            .await
            .cloned()
    }
}

impl ProviderFactory for VertexAiFactory {
    fn provider_type(&self) -> ProviderType {
        ProviderType::VertexAi
    }

    fn initialize(&self) -> BoxFuture<'_, Result<(), LlmError>> {
        Box::pin(async move { self.client().await.map(|_| ()) })
    }

    fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    fn start_session(
        &self,
        persona: PersonaConfig,
    ) -> BoxFuture<'_, Result<Box<dyn ProviderSession>, LlmError>> {
        Box::pin(async move {
            let client = self.client().await?;
            Ok(Box::new(VertexAiSession::new(client, persona)) as Box<dyn ProviderSession>)
        })
    }

    fn count_tokens<'a>(&'a self, text: &'a str, model: &'a str) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let counted = match self.client().await {
                Ok(client) => client.count_tokens(text, model).await,
                Err(e) => Err(e),
            };
            counted.unwrap_or_else(|e| {
                warn!("Vertex AI token count failed, using estimate: {}", e);
                estimate_tokens(text, env::defaults::VERTEX_CHARS_PER_TOKEN)
            })
        })
    }
}

pub struct VertexAiSession {
    client: Arc<VertexClient>,
    persona: PersonaConfig,
    exchange: Mutex<Option<Vec<ChatMessage>>>,
}

impl VertexAiSession {
    fn new(client: Arc<VertexClient>, persona: PersonaConfig) -> Self {
        Self {
            client,
            persona,
            exchange: Mutex::new(None),
        }
    }
}

impl ProviderSession for VertexAiSession {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move {
            let contents = vec![Content::text(Some("user"), prompt)];
            self.client.generate_content(&self.persona, contents).await
        })
    }

    fn start_exchange(&self) -> BoxFuture<'_, Result<(), LlmError>> {
        Box::pin(async move {
            let mut exchange = self.exchange.lock().await;
            if exchange.is_some() {
                warn!("Chat exchange already started for persona '{}'", self.persona.name);
            } else {
                *exchange = Some(Vec::new());
            }
            Ok(())
        })
    }

    fn continue_exchange<'a>(
        &'a self,
        message: &'a str,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move {
            let mut contents = {
                let exchange = self.exchange.lock().await;
                let history = exchange.as_ref().ok_or(LlmError::SessionNotStarted)?;
                history.iter().map(Content::from_message).collect::<Vec<_>>()
            };
            contents.push(Content::text(Some("user"), message));

            let response = self.client.generate_content(&self.persona, contents).await?;

            if let Some(history) = self.exchange.lock().await.as_mut() {
                history.push(ChatMessage::user(message));
                history.push(ChatMessage::assistant(response.text.clone()));
            }
            debug!("Vertex AI exchange turn completed ({})", response.finish_reason);
            Ok(response)
        })
    }

    fn history(&self) -> BoxFuture<'_, Vec<ChatMessage>> {
        Box::pin(async move { self.exchange.lock().await.clone().unwrap_or_default() })
    }

    fn reset_exchange(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            *self.exchange.lock().await = None;
        })
    }

    fn model(&self) -> &str {
        &self.persona.model
    }
}
