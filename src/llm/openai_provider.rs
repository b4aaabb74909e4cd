//! OpenAI backend
//!
//! Uses the chat completions endpoint with strict structured output. Schemas handed
//! to this backend must already have gone through [`crate::llm::schema::to_strict_schema`].

use crate::config::OpenAiConfig;
use crate::env;
use crate::llm::provider::{ProviderFactory, ProviderSession};
use crate::llm::types::{
    ChatMessage, ChatRole, FinishReason, LlmError, LlmResponse, PersonaConfig, ProviderType,
    ResponseFormat, TokenUsage, estimate_tokens,
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

/// Appended to the persona's system instruction whenever JSON output is requested.
pub const STRICT_OUTPUT_SUFFIX: &str = "\n\n[CRITICAL INSTRUCTIONS]\n\
- Respond with a single JSON object that follows the provided response schema exactly.\n\
- Do not add fields that the schema does not define and do not omit required fields.\n\
- Write every text value in the same language as the input content.";

const DEFAULT_SCHEMA_NAME: &str = "response_schema";

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
    /// Responses API status, accepted for payloads from that endpoint
    status: Option<String>,
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
    parsed: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default, alias = "input_tokens")]
    prompt_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    completion_tokens: u64,
}

/// Maps a chat completions `finish_reason` onto the normalized enum.
pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None => FinishReason::Unspecified,
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::MaxTokens,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Other,
    }
}

/// Maps a Responses API `status` onto the normalized enum.
pub fn map_status(status: &str) -> FinishReason {
    match status {
        "completed" => FinishReason::Stop,
        "incomplete" => FinishReason::MaxTokens,
        _ => FinishReason::Other,
    }
}

/// Converts a raw completion payload into an [`LlmResponse`].
pub fn map_response(payload: Value, model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: ChatCompletionResponse = serde_json::from_value(payload.clone())
        .map_err(|e| LlmError::InvalidResponse(format!("unexpected OpenAI payload: {}", e)))?;

    // Reported totals may include cached or reasoning tokens; keep input + output.
    let usage = parsed
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let (text, finish_reason, structured) = match parsed.choices.into_iter().next() {
        Some(choice) => {
            let finish_reason = map_finish_reason(choice.finish_reason.as_deref());
            match choice.message {
                Some(message) if message.refusal.is_some() => {
                    let refusal = message.refusal.unwrap_or_default();
                    warn!("OpenAI refused the request: {}", refusal);
                    (String::new(), FinishReason::Safety, None)
                }
                Some(message) => (message.content.unwrap_or_default(), finish_reason, message.parsed),
                None => (String::new(), finish_reason, None),
            }
        }
        None => match parsed.status.as_deref() {
            Some(status) => {
                let refusal = parsed
                    .output
                    .iter()
                    .flat_map(|item| item.content.iter())
                    .find_map(|part| part.refusal.as_deref());
                match refusal {
                    Some(refusal) => {
                        warn!("OpenAI refused the request: {}", refusal);
                        (String::new(), FinishReason::Safety, None)
                    }
                    None => {
                        let text = match parsed.output_text {
                            Some(text) => text,
                            None => output_text(&parsed.output),
                        };
                        (text, map_status(status), None)
                    }
                }
            }
            None => (String::new(), FinishReason::Unspecified, None),
        },
    };

    Ok(LlmResponse {
        text,
        finish_reason,
        usage,
        model: parsed.model.unwrap_or_else(|| model.to_string()),
        raw: Some(payload),
        parsed: structured,
    })
}

/// Text parts of a Responses API `output` array, in order
fn output_text(items: &[OutputItem]) -> String {
    items
        .iter()
        .flat_map(|item| item.content.iter())
        .filter(|part| part.kind == "output_text")
        .filter_map(|part| part.text.as_deref())
        .collect()
}

/// `response_format` payload for a persona, or `None` for plain text.
pub fn response_format_payload(persona: &PersonaConfig) -> Option<Value> {
    match (&persona.response_format, &persona.response_schema) {
        (ResponseFormat::Json, Some(schema)) => {
            let name = schema
                .get("title")
                .and_then(Value::as_str)
                .map(sanitize_schema_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_string());
            Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "strict": true,
                    "schema": schema,
                }
            }))
        }
        (ResponseFormat::Json, None) => Some(json!({ "type": "json_object" })),
        (ResponseFormat::Text, _) => None,
    }
}

fn sanitize_schema_name(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(64)
        .collect()
}

/// System instruction as sent to the backend
pub fn effective_system_instruction(persona: &PersonaConfig) -> Option<String> {
    match (persona.system_instruction.as_deref(), persona.response_format) {
        (Some(instruction), ResponseFormat::Json) => {
            Some(format!("{}{}", instruction, STRICT_OUTPUT_SUFFIX))
        }
        (None, ResponseFormat::Json) => Some(STRICT_OUTPUT_SUFFIX.trim_start().to_string()),
        (instruction, ResponseFormat::Text) => instruction.map(str::to_string),
    }
}

#[derive(Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    completions_url: Url,
    api_key: String,
    organization: Option<String>,
}

impl OpenAiClient {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::Configuration(format!(
                "OpenAI API key is not set (config `openai.api_key` or {})",
                env::vars::OPENAI_API_KEY
            ))
        })?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let completions_url = Url::parse(&base)
            .and_then(|base| base.join("chat/completions"))
            .map_err(|e| {
                LlmError::Configuration(format!("invalid OpenAI base url '{}': {}", base, e))
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            completions_url,
            api_key,
            organization: config.organization.clone(),
        })
    }

    async fn complete(
        &self,
        persona: &PersonaConfig,
        system_instruction: Option<&str>,
        history: &[ChatMessage],
        prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(instruction) = system_instruction {
            messages.push(RequestMessage {
                role: "system",
                content: instruction,
            });
        }
        for message in history {
            let role = match message.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(RequestMessage {
                role,
                content: &message.content,
            });
        }
        messages.push(RequestMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatCompletionRequest {
            model: &persona.model,
            temperature: persona.temperature,
            messages,
            response_format: response_format_payload(persona),
        };

        let mut builder = self
            .http
            .post(self.completions_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request);
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }
        let payload: Value = response.json().await?;
        map_response(payload, &persona.model)
    }
}

pub struct OpenAiFactory {
    config: OpenAiConfig,
    client: OnceCell<Arc<OpenAiClient>>,
    encoders: DashMap<String, Arc<CoreBPE>>,
}

impl OpenAiFactory {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            encoders: DashMap::new(),
        }
    }

    /// Tokenizer for `model`, falling back to `cl100k_base` for unknown models.
    fn encoder(&self, model: &str) -> Option<Arc<CoreBPE>> {
        if let Some(encoder) = self.encoders.get(model) {
            return Some(Arc::clone(encoder.value()));
        }
        let loaded = tiktoken_rs::get_bpe_from_model(model).or_else(|_| {
            debug!("No tokenizer registered for {}; using cl100k_base", model);
            tiktoken_rs::cl100k_base()
        });
        match loaded {
            Ok(encoder) => {
                let encoder = Arc::new(encoder);
                self.encoders.insert(model.to_string(), Arc::clone(&encoder));
                Some(encoder)
            }
            Err(e) => {
                warn!("Failed to load tokenizer for {}: {}", model, e);
                None
            }
        }
    }

    async fn client(&self) -> Result<Arc<OpenAiClient>, LlmError> {
        self.client
            .get_or_try_init(|| async {
                let client = OpenAiClient::from_config(&self.config)?;
                info!("OpenAI client ready ({})", client.completions_url);
                Ok::<_, LlmError>(Arc::new(client))
            })
            .await
            .cloned()
    }
}

impl ProviderFactory for OpenAiFactory {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
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
            Ok(Box::new(OpenAiSession::new(client, persona)) as Box<dyn ProviderSession>)
        })
    }

    /// Counts locally with the model's tokenizer; estimates when none can be loaded.
    fn count_tokens<'a>(&'a self, text: &'a str, model: &'a str) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            match self.encoder(model) {
                Some(encoder) => encoder.encode_with_special_tokens(text).len() as u64,
                None => estimate_tokens(text, env::defaults::OPENAI_CHARS_PER_TOKEN),
            }
        })
    }
}

pub struct OpenAiSession {
    client: Arc<OpenAiClient>,
    persona: PersonaConfig,
    system_instruction: Option<String>,
    exchange: Mutex<Option<Vec<ChatMessage>>>,
}

impl OpenAiSession {
    fn new(client: Arc<OpenAiClient>, persona: PersonaConfig) -> Self {
        let system_instruction = effective_system_instruction(&persona);
        Self {
            client,
            persona,
            system_instruction,
            exchange: Mutex::new(None),
        }
    }
}

impl ProviderSession for OpenAiSession {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move {
            self.client
                .complete(&self.persona, self.system_instruction.as_deref(), &[], prompt)
                .await
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
            let history = self
                .exchange
                .lock()
                .await
                .clone()
                .ok_or(LlmError::SessionNotStarted)?;

            let response = self
                .client
                .complete(&self.persona, self.system_instruction.as_deref(), &history, message)
                .await?;

            if let Some(history) = self.exchange.lock().await.as_mut() {
                history.push(ChatMessage::user(message));
                history.push(ChatMessage::assistant(response.text.clone()));
            }
            debug!("OpenAI exchange turn completed ({})", response.finish_reason);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(format: ResponseFormat, schema: Option<Value>) -> PersonaConfig {
        PersonaConfig {
            name: "pro_data_analyst".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            system_instruction: Some("You are a Precise Data Analyst.".to_string()),
            response_format: format,
            response_schema: schema,
        }
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("length")), FinishReason::MaxTokens);
        assert_eq!(map_finish_reason(Some("content_filter")), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason(Some("tool_calls")), FinishReason::Other);
        assert_eq!(map_status("completed"), FinishReason::Stop);
        assert_eq!(map_status("incomplete"), FinishReason::MaxTokens);
        assert_eq!(map_status("failed"), FinishReason::Other);
    }

    #[test]
    fn test_map_chat_completion() {
        let payload = json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"summary\":\"fine\"}"},
                "finish_reason": "length"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 60}
        });

        let response = map_response(payload, "gpt-4o").unwrap();
        assert_eq!(response.text, "{\"summary\":\"fine\"}");
        assert_eq!(response.finish_reason, FinishReason::MaxTokens);
        // Reported total counts cached tokens; only input + output is kept.
        assert_eq!(response.usage, TokenUsage::new(40, 12));
        assert_eq!(response.usage.total_tokens, 52);
        assert_eq!(response.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_map_responses_api_payload() {
        let payload = json!({
            "status": "incomplete",
            "output_text": "{\"summary\":",
            "usage": {"input_tokens": 7, "output_tokens": 3, "total_tokens": 10}
        });

        let response = map_response(payload, "gpt-4o-mini").unwrap();
        assert_eq!(response.finish_reason, FinishReason::MaxTokens);
        assert_eq!(response.text, "{\"summary\":");
        assert_eq!(response.usage.total_tokens, 10);
        assert_eq!(response.model, "gpt-4o-mini");
    }

    #[test]
    fn test_map_responses_api_output_array() {
        let payload = json!({
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "{\"summary\":"},
                    {"type": "output_text", "text": "\"ok\"}"}
                ]}
            ],
            "usage": {"input_tokens": 20, "output_tokens": 5, "total_tokens": 31}
        });

        let response = map_response(payload, "o4-mini").unwrap();
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.text, "{\"summary\":\"ok\"}");
        assert_eq!(response.usage.total_tokens, 25);

        let refused = json!({
            "status": "completed",
            "output": [{"type": "message", "content": [{"type": "refusal", "refusal": "No."}]}]
        });
        let response = map_response(refused, "o4-mini").unwrap();
        assert_eq!(response.finish_reason, FinishReason::Safety);
        assert!(response.text.is_empty());
    }

    #[test]
    fn test_refusal_maps_to_safety() {
        let payload = json!({
            "choices": [{
                "message": {"role": "assistant", "content": null, "refusal": "I can't help with that."},
                "finish_reason": "stop"
            }]
        });

        let response = map_response(payload, "gpt-4o").unwrap();
        assert_eq!(response.finish_reason, FinishReason::Safety);
        assert!(response.text.is_empty());
    }

    #[test]
    fn test_response_format_payloads() {
        let schema = json!({"title": "Structured Analysis!", "type": "object"});
        let format = response_format_payload(&persona(ResponseFormat::Json, Some(schema))).unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "StructuredAnalysis");
        assert_eq!(format["json_schema"]["strict"], true);

        let untitled = response_format_payload(&persona(
            ResponseFormat::Json,
            Some(json!({"type": "object"})),
        ))
        .unwrap();
        assert_eq!(untitled["json_schema"]["name"], DEFAULT_SCHEMA_NAME);

        let json_mode = response_format_payload(&persona(ResponseFormat::Json, None)).unwrap();
        assert_eq!(json_mode, json!({"type": "json_object"}));

        assert!(response_format_payload(&persona(ResponseFormat::Text, None)).is_none());
    }

    #[test]
    fn test_system_instruction_suffix_only_for_json() {
        let json_persona = persona(ResponseFormat::Json, None);
        let instruction = effective_system_instruction(&json_persona).unwrap();
        assert!(instruction.starts_with("You are a Precise Data Analyst."));
        assert!(instruction.contains("[CRITICAL INSTRUCTIONS]"));

        let text_persona = persona(ResponseFormat::Text, None);
        assert_eq!(
            effective_system_instruction(&text_persona).as_deref(),
            Some("You are a Precise Data Analyst.")
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let factory = OpenAiFactory::new(OpenAiConfig::default());
        let err = factory.initialize().await.unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
        assert!(!factory.is_initialized());
    }

    #[tokio::test]
    async fn test_count_tokens_uses_model_tokenizer() {
        let factory = OpenAiFactory::new(OpenAiConfig::default());
        assert_eq!(factory.count_tokens("hello world", "gpt-4o").await, 2);
        // Unknown models fall back to cl100k_base.
        assert_eq!(factory.count_tokens("hello world", "in-house-model").await, 2);
        assert_eq!(factory.count_tokens("", "gpt-4o").await, 0);
        assert!(factory.encoders.contains_key("gpt-4o"));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let config = OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            ..OpenAiConfig::default()
        };
        let factory = OpenAiFactory::new(config);
        factory.initialize().await.unwrap();
        let first = factory.client().await.unwrap();
        factory.initialize().await.unwrap();
        let second = factory.client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.completions_url.as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
