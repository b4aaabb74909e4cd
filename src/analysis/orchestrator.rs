//! Two-pass analysis orchestration
//!
//! Sequence: filter input → structuring pass → refinement pass with the persona the
//! [`AnalysisMode`] selects → merge. The merge is deterministic: the category list of
//! the structuring pass is authoritative, the refinement only rewrites text.

use crate::analysis::error::AnalysisError;
use crate::analysis::models::{
    ContentAnalysisResult, ContentItem, FinalCategory, FinalResult, RefinedCategorySummary,
    RefinedSummary, RefinementInput, StructuredAnalysisResult,
};
use crate::analysis::persona::{AnalysisMode, PersonaType};
use crate::analysis::service::{AnalysisRequest, AnalysisService};
use crate::analysis::store::{
    AnalysisState, ContentRetrieval, ProjectKey, ResultKey, ResultStore, StoreError,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Wire shape accepted for input items; `id` is optional and assigned by position
#[derive(Debug, Deserialize)]
struct RawContentItem {
    id: Option<u64>,
    content: String,
    #[serde(default)]
    has_image: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Parse a JSON array of content items. Elements of an unexpected shape are logged and
/// skipped; a missing `id` becomes the element's 1-based position.
pub fn contents_from_json(value: &Value) -> Result<Vec<ContentItem>, AnalysisError> {
    let elements = value.as_array().ok_or_else(|| {
        AnalysisError::Serialization("content input must be a JSON array".to_string())
    })?;

    let mut items = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        match RawContentItem::deserialize(element) {
            Ok(raw) => items.push(ContentItem {
                id: raw.id.unwrap_or(index as u64 + 1),
                content: raw.content,
                has_image: raw.has_image,
                created_at: raw.created_at,
                updated_at: raw.updated_at,
            }),
            Err(e) => warn!("Skipping content element {}: {}", index, e),
        }
    }
    Ok(items)
}

/// Drop items with blank text and repeated ids (first occurrence wins).
pub fn validate_contents(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let total = items.len();
    let mut seen = HashSet::new();
    let kept: Vec<ContentItem> = items
        .into_iter()
        .filter(|item| {
            if item.content.trim().is_empty() {
                debug!("Dropping content {} with empty text", item.id);
                return false;
            }
            if !seen.insert(item.id) {
                warn!("Dropping content with duplicate id {}", item.id);
                return false;
            }
            true
        })
        .collect();
    if kept.len() < total {
        info!("Kept {} of {} content items", kept.len(), total);
    }
    kept
}

/// Item with the most recent update/creation timestamp, falling back to the largest
/// id when no item carries a timestamp.
pub fn select_baseline_content_id(items: &[ContentItem]) -> Option<u64> {
    items
        .iter()
        .filter_map(|item| item.last_activity().map(|at| (at, item.id)))
        .max()
        .map(|(_, id)| id)
        .or_else(|| items.iter().map(|item| item.id).max())
}

/// Merge refined text into the structuring result.
///
/// Categories keep their order and count. A category the refinement omitted keeps its
/// original summary and keywords; refined keys with no matching category are ignored.
/// The overall summary and keywords always come from the refinement.
pub fn merge_refinement(structured: &StructuredAnalysisResult, refined: &RefinedSummary) -> FinalResult {
    let refined_by_key: HashMap<&str, &RefinedCategorySummary> = refined
        .categories
        .iter()
        .map(|category| (category.key.as_str(), category))
        .collect();

    let known: HashSet<&str> = structured
        .categories
        .iter()
        .map(|category| category.key.as_str())
        .collect();
    for key in refined_by_key.keys().filter(|key| !known.contains(*key)) {
        warn!("Ignoring refined category '{}' absent from the structuring result", key);
    }

    let categories = structured
        .categories
        .iter()
        .map(|category| {
            let (summary, keywords) = match refined_by_key.get(category.key.as_str()) {
                Some(refined) => (refined.summary.clone(), refined.keywords.clone()),
                None => {
                    warn!(
                        "Refinement omitted category '{}'; keeping the original summary",
                        category.key
                    );
                    (category.summary.clone(), category.keywords.clone())
                }
            };
            FinalCategory {
                name: category.name.clone(),
                key: category.key.clone(),
                display_highlight: category.display_highlight.clone(),
                sentiment_type: category.sentiment_type,
                summary,
                keywords,
                positive_count: category.positive_count(),
                negative_count: category.negative_count(),
                highlights: category.highlights.clone(),
            }
        })
        .collect();

    FinalResult {
        summary: refined.summary.clone(),
        keywords: refined.keywords.clone(),
        categories,
        harmful_contents: structured.harmful_contents.clone(),
        etc_contents: structured.etc_contents.clone(),
    }
}

pub struct AnalysisOrchestrator {
    service: AnalysisService,
}

impl AnalysisOrchestrator {
    pub fn new(service: AnalysisService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &AnalysisService {
        &self.service
    }

    /// Run both passes over `items` and bundle the outcome as version 1.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        items: Vec<ContentItem>,
        mode: AnalysisMode,
    ) -> Result<ContentAnalysisResult, AnalysisError> {
        let items = validate_contents(items);
        if items.is_empty() {
            return Err(AnalysisError::NoContent(format!("project {}", request.project_id)));
        }

        let (structured, structure_usage) = self.service.structure(request, &items).await?;
        let persona = mode.persona();
        let (refined, refine_usage) = self
            .service
            .refine(request, &RefinementInput::from(&structured), persona)
            .await?;

        let data = merge_refinement(&structured, &refined);
        let now = Utc::now();
        Ok(ContentAnalysisResult {
            version: 1,
            project_id: request.project_id,
            project_type: request.project_type,
            content_type: request.content_type,
            mode,
            meta_persona: PersonaType::ProDataAnalyst,
            persona,
            meta_data: structured,
            data,
            usages: vec![structure_usage, refine_usage],
            baseline_content_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch, analyze and persist the contents of one project.
    ///
    /// Results are versioned per backend: the version continues from the latest result
    /// stored for the current provider. Persistence is best effort. Lookup and save
    /// failures are logged and the fresh result is still returned; a failed analysis
    /// marks the previous result as failed.
    pub async fn project_analysis(
        &self,
        retrieval: &dyn ContentRetrieval,
        store: &dyn ResultStore,
        request: &AnalysisRequest,
        mode: AnalysisMode,
    ) -> Result<ContentAnalysisResult, AnalysisError> {
        let project = ProjectKey::new(request.project_id, request.project_type, request.content_type);
        let key = ResultKey::new(project, self.service.current_provider()?);
        let items = retrieval.fetch_contents(&project).await?;
        let baseline = select_baseline_content_id(&items);

        let mut result = match self.analyze(request, items, mode).await {
            Ok(result) => result,
            Err(e) => {
                // Flag the previous document so readers know it was not refreshed.
                match store
                    .update_state(&key, AnalysisState::Failed, Some(e.to_string()))
                    .await
                {
                    Ok(()) => info!(
                        "Marked analysis for project {} on {} as failed",
                        request.project_id, key.provider
                    ),
                    Err(StoreError::NoResult(..)) => {}
                    Err(store_err) => warn!(
                        "Could not record failure for project {}: {}",
                        request.project_id, store_err
                    ),
                }
                return Err(e);
            }
        };
        result.baseline_content_id = baseline;

        match store.latest(&key).await {
            Ok(Some(previous)) => {
                result.version = previous.result.version + 1;
                result.created_at = previous.result.created_at;
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Could not load previous analysis for project {}: {}",
                request.project_id, e
            ),
        }

        match store.save(&key, &result, AnalysisState::Completed).await {
            Ok(id) => info!(
                "Saved analysis v{} for project {} on {} as {}",
                result.version, request.project_id, key.provider, id
            ),
            Err(e) => error!(
                "Failed to save analysis for project {}: {}",
                request.project_id, e
            ),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::models::{CategorySummary, SentimentContent, SentimentType};
    use chrono::TimeZone;

    fn category(name: &str) -> CategorySummary {
        CategorySummary {
            name: name.to_string(),
            key: CategorySummary::key_for(name),
            display_highlight: name.to_string(),
            sentiment_type: SentimentType::Positive,
            summary: format!("original {}", name),
            keywords: vec![format!("{} keyword", name)],
            positive_contents: vec![SentimentContent { id: 1, score: 0.9 }],
            negative_contents: vec![],
            highlights: vec![],
        }
    }

    fn structured() -> StructuredAnalysisResult {
        StructuredAnalysisResult {
            summary: "original overall".to_string(),
            categories: vec![category("Shipping"), category("Build Quality")],
            harmful_contents: vec![9],
            etc_contents: vec![],
        }
    }

    fn refined_category(key: &str, summary: &str) -> RefinedCategorySummary {
        RefinedCategorySummary {
            key: key.to_string(),
            summary: summary.to_string(),
            keywords: vec!["refined".to_string()],
        }
    }

    #[test]
    fn test_merge_keeps_order_and_falls_back() {
        let refined = RefinedSummary {
            summary: "refined overall".to_string(),
            keywords: vec!["fast".to_string()],
            categories: vec![refined_category("Build_Quality", "solid")],
        };
        let merged = merge_refinement(&structured(), &refined);

        let keys: Vec<&str> = merged.categories.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["Shipping", "Build_Quality"]);
        assert_eq!(merged.categories[0].summary, "original Shipping");
        assert_eq!(merged.categories[0].keywords, vec!["Shipping keyword"]);
        assert_eq!(merged.categories[1].summary, "solid");
        assert_eq!(merged.summary, "refined overall");
        assert_eq!(merged.keywords, vec!["fast"]);
        assert_eq!(merged.harmful_contents, vec![9]);
        assert_eq!(merged.categories[0].positive_count, 1);
    }

    #[test]
    fn test_merge_ignores_unknown_keys() {
        let refined = RefinedSummary {
            summary: String::new(),
            keywords: vec![],
            categories: vec![refined_category("Invented", "made up")],
        };
        let merged = merge_refinement(&structured(), &refined);
        assert_eq!(merged.categories.len(), 2);
        assert!(merged.categories.iter().all(|c| c.key != "Invented"));
        // Empty refined summary still replaces the original.
        assert_eq!(merged.summary, "");
    }

    #[test]
    fn test_baseline_prefers_latest_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut created = ContentItem::new(2, "b");
        created.created_at = Some(t1);
        let mut updated = ContentItem::new(3, "c");
        updated.created_at = Some(t1);
        updated.updated_at = Some(t2);
        let items = vec![ContentItem::new(10, "a"), created, updated];
        assert_eq!(select_baseline_content_id(&items), Some(3));
    }

    #[test]
    fn test_baseline_falls_back_to_largest_id() {
        let items = vec![
            ContentItem::new(5, "a"),
            ContentItem::new(1, "b"),
            ContentItem::new(9, "c"),
        ];
        assert_eq!(select_baseline_content_id(&items), Some(9));
        assert_eq!(select_baseline_content_id(&[]), None);
    }

    #[test]
    fn test_validate_contents_filters_blank_and_duplicates() {
        let items = vec![
            ContentItem::new(1, "good"),
            ContentItem::new(2, "   "),
            ContentItem::new(1, "again"),
            ContentItem::new(3, "fine"),
        ];
        let kept = validate_contents(items);
        let ids: Vec<u64> = kept.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(kept[0].content, "good");
    }

    #[test]
    fn test_contents_from_json_assigns_positions_and_skips_bad_shapes() {
        let value = serde_json::json!([
            {"content": "first"},
            {"id": 40, "content": "second", "has_image": true},
            42,
            {"text": "wrong field"},
            {"content": "fifth", "updated_at": "2024-05-01T10:00:00Z"}
        ]);
        let items = contents_from_json(&value).unwrap();
        let ids: Vec<u64> = items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![1, 40, 5]);
        assert!(items[1].has_image);
        assert!(items[2].updated_at.is_some());

        assert!(contents_from_json(&serde_json::json!({"content": "x"})).is_err());
    }
}
