//! Analysis service: runs the structuring and refinement passes against the
//! currently selected backend.

use crate::analysis::error::AnalysisError;
use crate::analysis::models::{
    AnalysisContentItem, ContentItem, LlmUsageInfo, RefinedSummary, RefinementInput,
    StructuredAnalysisResult,
};
use crate::analysis::persona::{ContentType, PersonaType, ProjectType};
use crate::analysis::prompt::{DefaultPromptRenderer, PromptContext, PromptRenderer};
use crate::analysis::retry::{FailedAttempt, ValidationRetry};
use crate::analysis::validation::Validate;
use crate::config::ReviewInsightsConfig;
use crate::llm::registry::ProviderRegistry;
use crate::llm::schema::{self, describe_schema};
use crate::llm::types::{FinishReason, LlmError, LlmResponse, ProviderType};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const STRUCTURE_STEP: u32 = 1;
pub const REFINE_STEP: u32 = 2;

/// Identifies the project an analysis call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub project_id: u64,
    pub project_type: ProjectType,
    pub content_type: Option<ContentType>,
}

impl AnalysisRequest {
    pub fn new(project_id: u64, project_type: ProjectType, content_type: Option<ContentType>) -> Self {
        Self {
            project_id,
            project_type,
            content_type,
        }
    }
}

/// Usable text of a response.
///
/// Policy blocks and empty text fail; a length-limited response is returned with a
/// warning. Backends that already parsed the output supply it via `parsed`.
pub fn extract_text(response: &LlmResponse) -> Result<String, LlmError> {
    if response.finish_reason.is_blocked() {
        return Err(LlmError::Blocked {
            reason: response.finish_reason,
            message: format!("model {} refused to generate", response.model),
        });
    }

    let text = if response.text.trim().is_empty() {
        match &response.parsed {
            Some(parsed) => parsed.to_string(),
            None => String::new(),
        }
    } else {
        response.text.clone()
    };
    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse(response.finish_reason));
    }

    if response.finish_reason == FinishReason::MaxTokens {
        warn!(
            "Response from {} hit the token limit; using partial output ({} chars)",
            response.model,
            text.chars().count()
        );
    }
    Ok(text)
}

pub struct AnalysisService {
    registry: Arc<ProviderRegistry>,
    renderer: Arc<dyn PromptRenderer>,
    config: ReviewInsightsConfig,
    retry: ValidationRetry,
}

impl AnalysisService {
    pub fn new(registry: Arc<ProviderRegistry>, config: ReviewInsightsConfig) -> Self {
        Self::with_renderer(registry, config, Arc::new(DefaultPromptRenderer))
    }

    pub fn with_renderer(
        registry: Arc<ProviderRegistry>,
        config: ReviewInsightsConfig,
        renderer: Arc<dyn PromptRenderer>,
    ) -> Self {
        let retry = ValidationRetry::from_settings(&config.analysis);
        Self {
            registry,
            renderer,
            config,
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ReviewInsightsConfig {
        &self.config
    }

    fn prompt_context(&self, request: &AnalysisRequest) -> PromptContext {
        let settings = &self.config.analysis;
        PromptContext {
            project_id: request.project_id,
            project_type: request.project_type,
            content_type: request.content_type,
            max_categories: settings.max_categories,
            max_main_summary_chars: settings.max_main_summary_chars,
            max_category_summary_chars: settings.max_category_summary_chars,
        }
    }

    /// Backend the next generation step will run on.
    pub fn current_provider(&self) -> Result<ProviderType, LlmError> {
        self.registry.current().ok_or_else(|| {
            LlmError::ProviderNotInitialized("no provider has been selected".to_string())
        })
    }

    /// Structuring pass over `items`.
    pub async fn structure(
        &self,
        request: &AnalysisRequest,
        items: &[ContentItem],
    ) -> Result<(StructuredAnalysisResult, LlmUsageInfo), AnalysisError> {
        if items.is_empty() {
            return Err(AnalysisError::NoContent(format!("project {}", request.project_id)));
        }

        let projection: Vec<AnalysisContentItem<'_>> =
            items.iter().map(AnalysisContentItem::from).collect();
        let contents_json = serde_json::to_string(&projection)
            .map_err(|e| AnalysisError::Serialization(e.to_string()))?;

        info!(
            "Structuring {} items for project {} ({})",
            items.len(),
            request.project_id,
            request.project_type
        );
        self.run_step(
            STRUCTURE_STEP,
            "structure_content_analysis",
            PersonaType::ProDataAnalyst,
            |renderer, context, notes| renderer.structuring_prompt(context, &contents_json, notes),
            request,
        )
        .await
    }

    /// Refinement pass over the reduced projection of a structuring result.
    pub async fn refine(
        &self,
        request: &AnalysisRequest,
        input: &RefinementInput,
        persona: PersonaType,
    ) -> Result<(RefinedSummary, LlmUsageInfo), AnalysisError> {
        let input_json = serde_json::to_string(input)
            .map_err(|e| AnalysisError::Serialization(e.to_string()))?;

        info!(
            "Refining {} categories for project {} as {}",
            input.categories.len(),
            request.project_id,
            persona
        );
        self.run_step(
            REFINE_STEP,
            "refine_content_analysis",
            persona,
            |renderer, context, notes| renderer.refinement_prompt(context, &input_json, persona, notes),
            request,
        )
        .await
    }

    async fn run_step<T, P>(
        &self,
        step: u32,
        context_label: &str,
        persona: PersonaType,
        build_prompt: P,
        request: &AnalysisRequest,
    ) -> Result<(T, LlmUsageInfo), AnalysisError>
    where
        T: DeserializeOwned + Validate + JsonSchema,
        P: FnOnce(&dyn PromptRenderer, &PromptContext, &str) -> String,
    {
        let provider = self.current_provider()?;
        let backend_schema = schema::to_backend_schema::<T>(provider)?;
        let notes = describe_schema(&backend_schema);
        let prompt = build_prompt(self.renderer.as_ref(), &self.prompt_context(request), &notes);

        let persona_config = persona.config(
            provider,
            &self.config,
            self.renderer.system_instruction(persona),
            Some(backend_schema),
        );
        let model = persona_config.model.clone();
        let session = self.registry.start_session(persona_config, Some(provider)).await?;

        let started = Instant::now();
        let session = session.as_ref();
        let prompt = prompt.as_str();
        let (value, usage) = self
            .retry
            .validate_with_retry_and_usage::<T, _, _>(
                move || async move {
                    let response = session.generate(prompt).await?;
                    let text = extract_text(&response)
                        .map_err(|e| FailedAttempt::billed(e, response.usage))?;
                    Ok::<_, FailedAttempt>((text, response.usage))
                },
                context_label,
            )
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let usage_info = LlmUsageInfo::new(step, model, usage, duration_ms);
        info!(
            "{} finished in {}ms ({} input / {} output tokens)",
            context_label, duration_ms, usage_info.input_tokens, usage_info.output_tokens
        );
        Ok((value, usage_info))
    }
}
