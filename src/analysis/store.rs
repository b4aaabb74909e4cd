//! Collaborators for project-level analysis: where contents come from and where
//! versioned results go. In-memory implementations back the CLI and tests.

use crate::analysis::models::{ContentAnalysisResult, ContentItem};
use crate::analysis::persona::{ContentType, ProjectType};
use crate::llm::types::ProviderType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("No contents found for project {0}")]
    NotFound(u64),
    #[error("No stored analysis for project {0} on {1}")]
    NoResult(u64, ProviderType),
}

/// Identifies the stream of results one analysis target produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectKey {
    pub project_id: u64,
    pub project_type: ProjectType,
    pub content_type: Option<ContentType>,
}

impl ProjectKey {
    pub fn new(project_id: u64, project_type: ProjectType, content_type: Option<ContentType>) -> Self {
        Self {
            project_id,
            project_type,
            content_type,
        }
    }
}

/// Results are versioned separately for each backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub project: ProjectKey,
    pub provider: ProviderType,
}

impl ResultKey {
    pub fn new(project: ProjectKey, provider: ProviderType) -> Self {
        Self { project, provider }
    }
}

/// Lifecycle of a stored analysis document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisState {
    Unavailable,
    InProgress,
    Failed,
    #[default]
    Completed,
}

/// A persisted result with its storage id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub state: AnalysisState,
    /// Why the state last changed, when it was not a plain completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub result: ContentAnalysisResult,
}

#[async_trait]
pub trait ContentRetrieval: Send + Sync {
    async fn fetch_contents(&self, key: &ProjectKey) -> Result<Vec<ContentItem>, StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Most recently saved result for `key`, if any.
    async fn latest(&self, key: &ResultKey) -> Result<Option<StoredAnalysis>, StoreError>;

    async fn save(
        &self,
        key: &ResultKey,
        result: &ContentAnalysisResult,
        state: AnalysisState,
    ) -> Result<Uuid, StoreError>;

    /// Moves the latest result for `key` to `state`.
    async fn update_state(
        &self,
        key: &ResultKey,
        state: AnalysisState,
        reason: Option<String>,
    ) -> Result<(), StoreError>;
}

/// Contents registered up front, keyed by project
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    contents: DashMap<ProjectKey, Vec<ContentItem>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ProjectKey, items: Vec<ContentItem>) {
        self.contents.insert(key, items);
    }
}

#[async_trait]
impl ContentRetrieval for InMemoryContentSource {
    async fn fetch_contents(&self, key: &ProjectKey) -> Result<Vec<ContentItem>, StoreError> {
        self.contents
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(key.project_id))
    }
}

/// Keeps every saved version; `latest` returns the last one saved.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: DashMap<ResultKey, Vec<StoredAnalysis>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, key: &ResultKey) -> Vec<StoredAnalysis> {
        self.results
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn latest(&self, key: &ResultKey) -> Result<Option<StoredAnalysis>, StoreError> {
        Ok(self
            .results
            .get(key)
            .and_then(|entry| entry.value().last().cloned()))
    }

    async fn save(
        &self,
        key: &ResultKey,
        result: &ContentAnalysisResult,
        state: AnalysisState,
    ) -> Result<Uuid, StoreError> {
        let stored = StoredAnalysis {
            id: Uuid::new_v4(),
            saved_at: Utc::now(),
            state,
            reason: None,
            result: result.clone(),
        };
        let id = stored.id;
        self.results.entry(*key).or_default().push(stored);
        Ok(id)
    }

    async fn update_state(
        &self,
        key: &ResultKey,
        state: AnalysisState,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .results
            .get_mut(key)
            .ok_or(StoreError::NoResult(key.project.project_id, key.provider))?;
        let latest = entry
            .value_mut()
            .last_mut()
            .ok_or(StoreError::NoResult(key.project.project_id, key.provider))?;
        latest.state = state;
        latest.reason = reason;
        latest.saved_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::models::{FinalResult, StructuredAnalysisResult};
    use crate::analysis::persona::{AnalysisMode, PersonaType};

    #[tokio::test]
    async fn test_content_source_lookup() {
        let source = InMemoryContentSource::new();
        let key = ProjectKey::new(7, ProjectType::Store, Some(ContentType::Review));
        source.insert(key, ContentItem::from_texts(["one", "two"]));

        assert_eq!(source.fetch_contents(&key).await.unwrap().len(), 2);

        let other = ProjectKey::new(7, ProjectType::Store, None);
        assert!(matches!(
            source.fetch_contents(&other).await,
            Err(StoreError::NotFound(7))
        ));
    }

    fn result_for(project_id: u64, version: u32) -> ContentAnalysisResult {
        let now = Utc::now();
        ContentAnalysisResult {
            version,
            project_id,
            project_type: ProjectType::Store,
            content_type: None,
            mode: AnalysisMode::ReviewBot,
            meta_persona: PersonaType::ProDataAnalyst,
            persona: PersonaType::CustomerFacingSmartBot,
            meta_data: StructuredAnalysisResult {
                summary: "overall".to_string(),
                categories: vec![],
                harmful_contents: vec![],
                etc_contents: vec![],
            },
            data: FinalResult {
                summary: "overall".to_string(),
                keywords: vec![],
                categories: vec![],
                harmful_contents: vec![],
                etc_contents: vec![],
            },
            usages: vec![],
            baseline_content_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest() {
        let store = InMemoryResultStore::new();
        let key = ResultKey::new(ProjectKey::new(1, ProjectType::Funding, None), ProviderType::OpenAi);
        assert!(store.latest(&key).await.unwrap().is_none());
        assert!(store.history(&key).is_empty());
        assert!(matches!(
            store.update_state(&key, AnalysisState::Failed, None).await,
            Err(StoreError::NoResult(1, ProviderType::OpenAi))
        ));
    }

    #[tokio::test]
    async fn test_results_are_kept_per_provider() {
        let store = InMemoryResultStore::new();
        let project = ProjectKey::new(3, ProjectType::Store, Some(ContentType::Review));
        let vertex = ResultKey::new(project, ProviderType::VertexAi);
        let openai = ResultKey::new(project, ProviderType::OpenAi);

        store.save(&vertex, &result_for(3, 1), AnalysisState::Completed).await.unwrap();
        store.save(&vertex, &result_for(3, 2), AnalysisState::Completed).await.unwrap();
        store.save(&openai, &result_for(3, 1), AnalysisState::Completed).await.unwrap();

        assert_eq!(store.history(&vertex).len(), 2);
        assert_eq!(store.latest(&openai).await.unwrap().unwrap().result.version, 1);
    }

    #[tokio::test]
    async fn test_update_state_touches_latest_only() {
        let store = InMemoryResultStore::new();
        let key = ResultKey::new(ProjectKey::new(9, ProjectType::Store, None), ProviderType::VertexAi);
        store.save(&key, &result_for(9, 1), AnalysisState::Completed).await.unwrap();
        store.save(&key, &result_for(9, 2), AnalysisState::InProgress).await.unwrap();

        store
            .update_state(&key, AnalysisState::Failed, Some("quota exhausted".to_string()))
            .await
            .unwrap();

        let history = store.history(&key);
        assert_eq!(history[0].state, AnalysisState::Completed);
        assert_eq!(history[1].state, AnalysisState::Failed);
        assert_eq!(history[1].reason.as_deref(), Some("quota exhausted"));
        assert_eq!(serde_json::to_value(AnalysisState::InProgress).unwrap(), "IN_PROGRESS");
    }
}
