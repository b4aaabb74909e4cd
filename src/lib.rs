//! # Review Insights
//!
//! Turns collections of user-generated text (reviews, comments, support messages) into
//! a category-organized summary with sentiment, highlights and bounded-length talking
//! points, using a large-language-model backend.
//!
//! ## Architecture Overview
//!
//! - **[`llm`]**: Provider-neutral session/factory interface, the provider registry,
//!   the structured-output schema adapter, and the Vertex AI and OpenAI backends
//! - **[`analysis`]**: Domain models, the validation-retry engine, prompt rendering,
//!   the two-pass analysis service and the orchestrator that merges both passes
//! - **[`config`]**: TOML configuration with discovery and environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use review_insights::{
//!     AnalysisMode, AnalysisOrchestrator, AnalysisRequest, AnalysisService, ContentItem,
//!     ProjectType, ProviderRegistry, ReviewInsightsConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReviewInsightsConfig::load(None)?;
//!     let registry = Arc::new(ProviderRegistry::from_config(&config));
//!     registry.initialize(config.provider).await?;
//!
//!     let orchestrator = AnalysisOrchestrator::new(AnalysisService::new(registry, config));
//!     let request = AnalysisRequest::new(42, ProjectType::Store, None);
//!     let items = ContentItem::from_texts(["Arrived in two days", "Strap broke after a week"]);
//!     let result = orchestrator.analyze(&request, items, AnalysisMode::ReviewBot).await?;
//!
//!     println!("{}", result.data.summary);
//!     Ok(())
//! }
//! ```

/// Provider-agnostic LLM interface.
///
/// Sessions and factories for each backend, the registry that selects between them,
/// and the schema adapter producing each backend's structured-output dialect.
pub mod llm;

/// Content analysis pipeline.
///
/// Structuring and refinement passes, validated through a retry engine and merged
/// deterministically into one versioned result.
pub mod analysis;

/// Configuration loading and discovery.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes file names, environment variable names and default values.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use analysis::{
    AnalysisError, AnalysisMode, AnalysisOrchestrator, AnalysisRequest, AnalysisService,
    ContentAnalysisResult, ContentItem, ContentType, PersonaType, ProjectType, RefinedSummary,
    StructuredAnalysisResult,
};
pub use config::{ConfigDiscovery, ReviewInsightsConfig};
pub use llm::{LlmError, LlmResponse, ProviderFactory, ProviderRegistry, ProviderSession, ProviderType};
