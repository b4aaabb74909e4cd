#![allow(dead_code)]

use futures::future::BoxFuture;
use review_insights::analysis::{AnalysisOrchestrator, AnalysisService};
use review_insights::llm::{
    ChatMessage, FinishReason, LlmError, LlmResponse, PersonaConfig, ProviderFactory,
    ProviderRegistry, ProviderSession, ProviderType, TokenUsage,
};
use review_insights::ReviewInsightsConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replies handed out in order; the last one repeats once the queue runs dry.
#[derive(Default)]
pub struct Script {
    replies: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    last: Mutex<Option<Result<LlmResponse, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    personas: Mutex<Vec<PersonaConfig>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(self: &Arc<Self>, text: &str) -> Arc<Self> {
        self.push(Ok(LlmResponse::new(text, FinishReason::Stop, TokenUsage::new(1000, 200))))
    }

    pub fn push(self: &Arc<Self>, reply: Result<LlmResponse, LlmError>) -> Arc<Self> {
        self.replies.lock().unwrap().push_back(reply);
        Arc::clone(self)
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn personas(&self) -> Vec<PersonaConfig> {
        self.personas.lock().unwrap().clone()
    }

    fn next(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = replies.pop_front() {
            *last = Some(reply.clone());
            return reply;
        }
        last.clone()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script is empty".to_string())))
    }
}

pub struct ScriptedSession {
    script: Arc<Script>,
    model: String,
}

impl ProviderSession for ScriptedSession {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move { self.script.next(prompt) })
    }

    fn start_exchange(&self) -> BoxFuture<'_, Result<(), LlmError>> {
        Box::pin(async { Ok(()) })
    }

    fn continue_exchange<'a>(
        &'a self,
        message: &'a str,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        self.generate(message)
    }

    fn history(&self) -> BoxFuture<'_, Vec<ChatMessage>> {
        Box::pin(async { Vec::new() })
    }

    fn reset_exchange(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub struct ScriptedFactory {
    provider: ProviderType,
    script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new(provider: ProviderType, script: Arc<Script>) -> Self {
        Self { provider, script }
    }
}

impl ProviderFactory for ScriptedFactory {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn initialize(&self) -> BoxFuture<'_, Result<(), LlmError>> {
        Box::pin(async { Ok(()) })
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn start_session(
        &self,
        persona: PersonaConfig,
    ) -> BoxFuture<'_, Result<Box<dyn ProviderSession>, LlmError>> {
        Box::pin(async move {
            let model = persona.model.clone();
            self.script.personas.lock().unwrap().push(persona);
            Ok(Box::new(ScriptedSession {
                script: Arc::clone(&self.script),
                model,
            }) as Box<dyn ProviderSession>)
        })
    }

    fn count_tokens<'a>(&'a self, text: &'a str, _model: &'a str) -> BoxFuture<'a, u64> {
        Box::pin(async move { text.len() as u64 / 4 })
    }
}

pub fn test_config(max_retries: u32) -> ReviewInsightsConfig {
    let mut config = ReviewInsightsConfig::default();
    config.analysis.max_retries = max_retries;
    config.analysis.retry_delay_ms = 0;
    config
}

pub async fn service_with(script: Arc<Script>, config: ReviewInsightsConfig) -> AnalysisService {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(ScriptedFactory::new(ProviderType::VertexAi, script)));
    registry
        .initialize(ProviderType::VertexAi)
        .await
        .expect("scripted backend initializes");
    AnalysisService::new(registry, config)
}

pub async fn orchestrator_with(script: Arc<Script>, config: ReviewInsightsConfig) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(service_with(script, config).await)
}

pub const STRUCTURED_JSON: &str = r#"{
  "summary": "Fast delivery, mixed build quality.",
  "categories": [
    {
      "name": "Shipping",
      "key": "Shipping",
      "display_highlight": "Arrived early",
      "sentiment_type": "positive",
      "summary": "Deliveries were quick.",
      "keywords": ["fast", "early"],
      "positive_contents": [{"id": 1, "score": 0.9}],
      "negative_contents": [],
      "highlights": [{"id": 1, "keyword": "fast", "highlight": "came in two days", "content": "Shipping was fast, came in two days"}]
    },
    {
      "name": "Quality",
      "key": "Quality",
      "display_highlight": "Strap issues",
      "sentiment_type": "neutral",
      "summary": "Quality opinions are split.",
      "keywords": ["strap", "sturdy"],
      "positive_contents": [{"id": 2, "score": 0.8}],
      "negative_contents": [{"id": 3, "score": 0.1}],
      "highlights": []
    }
  ],
  "harmful_contents": [],
  "etc_contents": [{"id": 4, "reason": "unrelated question"}]
}"#;
