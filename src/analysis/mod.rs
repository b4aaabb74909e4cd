//! Content analysis: domain models, the validation-retry engine, prompts, the
//! two-pass service and its orchestrator.

pub mod error;
pub mod models;
pub mod orchestrator;
pub mod persona;
pub mod pricing;
pub mod prompt;
pub mod retry;
pub mod service;
pub mod store;
pub mod validation;

pub use error::{AnalysisError, FailureCause};
pub use models::*;
pub use orchestrator::{
    AnalysisOrchestrator, contents_from_json, merge_refinement, select_baseline_content_id,
    validate_contents,
};
pub use persona::{AnalysisMode, ContentType, ModelTier, PersonaType, ProjectType};
pub use prompt::{DefaultPromptRenderer, PromptContext, PromptRenderer};
pub use retry::{FailedAttempt, RetryConfig, ValidationRetry};
pub use service::{AnalysisRequest, AnalysisService, extract_text};
pub use store::{
    AnalysisState, ContentRetrieval, InMemoryContentSource, InMemoryResultStore, ProjectKey,
    ResultKey, ResultStore, StoreError, StoredAnalysis,
};
pub use validation::{Validate, ValidationError, ValidationRules};
