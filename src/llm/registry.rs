//! Provider registry
//!
//! Holds one [`ProviderFactory`] per [`ProviderType`], tracks which backends were
//! explicitly initialized and which one is currently selected. The registry is built
//! once at startup and shared by reference (`Arc<ProviderRegistry>`) with the analysis
//! service; it is the only shared mutable state between concurrent analyses.

use crate::config::ReviewInsightsConfig;
use crate::llm::openai_provider::OpenAiFactory;
use crate::llm::provider::{ProviderFactory, ProviderSession};
use crate::llm::types::{LlmError, PersonaConfig, ProviderType};
use crate::llm::vertex_provider::VertexAiFactory;
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

pub struct ProviderRegistry {
    factories: DashMap<ProviderType, Arc<dyn ProviderFactory>>,
    initialized: DashSet<ProviderType>,
    current: RwLock<Option<ProviderType>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            initialized: DashSet::new(),
            current: RwLock::new(None),
        }
    }

    /// Registry with the Vertex AI and OpenAI factories registered but not initialized.
    pub fn from_config(config: &ReviewInsightsConfig) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(VertexAiFactory::new(config.vertex_ai.clone())));
        registry.register(Arc::new(OpenAiFactory::new(config.openai.clone())));
        registry
    }

    /// Register (or replace) the factory for its backend. Replacing clears the
    /// backend's initialized flag.
    pub fn register(&self, factory: Arc<dyn ProviderFactory>) {
        let provider = factory.provider_type();
        debug!("Registering provider factory: {}", provider);
        self.initialized.remove(&provider);
        self.factories.insert(provider, factory);
    }

    pub fn is_registered(&self, provider: ProviderType) -> bool {
        self.factories.contains_key(&provider)
    }

    pub fn is_initialized(&self, provider: ProviderType) -> bool {
        self.initialized.contains(&provider)
    }

    pub fn current(&self) -> Option<ProviderType> {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize `provider` and make it the current selection.
    ///
    /// Safe to call concurrently: the factory builds its client once, later callers
    /// observe the initialized state and proceed.
    pub async fn initialize(&self, provider: ProviderType) -> Result<(), LlmError> {
        let factory = self.registered(provider)?;
        if !self.initialized.contains(&provider) {
            factory.initialize().await?;
            if self.initialized.insert(provider) {
                info!("Initialized provider: {}", provider);
            }
        }
        self.set_current(provider);
        Ok(())
    }

    /// Switch the current selection to an already initialized backend.
    pub fn select(&self, provider: ProviderType) -> Result<(), LlmError> {
        self.registered(provider)?;
        if !self.is_initialized(provider) {
            return Err(LlmError::ProviderNotInitialized(provider.to_string()));
        }
        self.set_current(provider);
        Ok(())
    }

    /// Factory for `provider`, or for the current selection when `None`.
    pub fn factory(&self, provider: Option<ProviderType>) -> Result<Arc<dyn ProviderFactory>, LlmError> {
        let target = match provider.or_else(|| self.current()) {
            Some(target) => target,
            None => {
                return Err(LlmError::ProviderNotInitialized(
                    "no provider has been selected".to_string(),
                ));
            }
        };
        let factory = self.registered(target)?;
        if !self.is_initialized(target) {
            return Err(LlmError::ProviderNotInitialized(target.to_string()));
        }
        Ok(factory)
    }

    pub async fn start_session(
        &self,
        persona: PersonaConfig,
        provider: Option<ProviderType>,
    ) -> Result<Box<dyn ProviderSession>, LlmError> {
        let factory = self.factory(provider)?;
        debug!(
            "Starting {} session for persona '{}' with model {}",
            factory.provider_type(),
            persona.name,
            persona.model
        );
        factory.start_session(persona).await
    }

    /// Routing failures are reported; the count itself never fails.
    pub async fn count_tokens(
        &self,
        text: &str,
        model: &str,
        provider: Option<ProviderType>,
    ) -> Result<u64, LlmError> {
        let factory = self.factory(provider)?;
        Ok(factory.count_tokens(text, model).await)
    }

    fn registered(&self, provider: ProviderType) -> Result<Arc<dyn ProviderFactory>, LlmError> {
        // Clone out of the map so no shard lock is held across an await.
        self.factories
            .get(&provider)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LlmError::ProviderNotFound(provider))
    }

    fn set_current(&self, provider: ProviderType) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, FinishReason, LlmResponse, ResponseFormat, TokenUsage};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::OnceCell;

    struct CountingFactory {
        provider: ProviderType,
        client: OnceCell<()>,
        builds: AtomicUsize,
    }

    impl CountingFactory {
        fn new(provider: ProviderType) -> Self {
            Self {
                provider,
                client: OnceCell::new(),
                builds: AtomicUsize::new(0),
            }
        }
    }

    struct EchoSession;

    impl ProviderSession for EchoSession {
        fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
            Box::pin(async move {
                Ok(LlmResponse::new(prompt, FinishReason::Stop, TokenUsage::new(1, 1)))
            })
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
            "echo"
        }
    }

    impl ProviderFactory for CountingFactory {
        fn provider_type(&self) -> ProviderType {
            self.provider
        }

        fn initialize(&self) -> BoxFuture<'_, Result<(), LlmError>> {
            Box::pin(async move {
                self.client
                    .get_or_init(|| async {
                        self.builds.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                    })
                    .await;
                Ok(())
            })
        }

        fn is_initialized(&self) -> bool {
            self.client.initialized()
        }

        fn start_session(
            &self,
            _persona: PersonaConfig,
        ) -> BoxFuture<'_, Result<Box<dyn ProviderSession>, LlmError>> {
            Box::pin(async { Ok(Box::new(EchoSession) as Box<dyn ProviderSession>) })
        }

        fn count_tokens<'a>(&'a self, text: &'a str, _model: &'a str) -> BoxFuture<'a, u64> {
            Box::pin(async move { text.len() as u64 })
        }
    }

    fn persona() -> PersonaConfig {
        PersonaConfig {
            name: "test".to_string(),
            model: "echo".to_string(),
            temperature: 0.0,
            system_instruction: None,
            response_format: ResponseFormat::Text,
            response_schema: None,
        }
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry.initialize(ProviderType::OpenAi).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotFound(ProviderType::OpenAi)));
        assert!(registry.current().is_none());
    }

    #[tokio::test]
    async fn test_routing_requires_explicit_initialization() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(CountingFactory::new(ProviderType::VertexAi)));

        let err = registry.start_session(persona(), None).await.err().unwrap();
        assert!(matches!(err, LlmError::ProviderNotInitialized(_)));

        let err = registry
            .count_tokens("hello", "echo", Some(ProviderType::VertexAi))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotInitialized(_)));

        registry.initialize(ProviderType::VertexAi).await.unwrap();
        assert_eq!(registry.current(), Some(ProviderType::VertexAi));
        assert_eq!(registry.count_tokens("hello", "echo", None).await.unwrap(), 5);

        let session = registry.start_session(persona(), None).await.unwrap();
        let response = session.generate("ping").await.unwrap();
        assert_eq!(response.text, "ping");
    }

    #[tokio::test]
    async fn test_select_requires_initialized_backend() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(CountingFactory::new(ProviderType::VertexAi)));
        registry.register(Arc::new(CountingFactory::new(ProviderType::OpenAi)));
        registry.initialize(ProviderType::VertexAi).await.unwrap();

        assert!(matches!(
            registry.select(ProviderType::OpenAi),
            Err(LlmError::ProviderNotInitialized(_))
        ));
        registry.initialize(ProviderType::OpenAi).await.unwrap();
        registry.select(ProviderType::VertexAi).unwrap();
        assert_eq!(registry.current(), Some(ProviderType::VertexAi));
    }

    #[tokio::test]
    async fn test_concurrent_initialization_builds_client_once() {
        let registry = Arc::new(ProviderRegistry::new());
        let factory = Arc::new(CountingFactory::new(ProviderType::OpenAi));
        registry.register(factory.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.initialize(ProviderType::OpenAi).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(registry.is_initialized(ProviderType::OpenAi));
        assert!(factory.is_initialized());
    }
}
