//! Domain types for both analysis passes and the merged result.
//!
//! Types that the model fills in derive [`JsonSchema`]; their doc comments become the
//! field descriptions the backend sees.

use crate::analysis::persona::{AnalysisMode, ContentType, PersonaType, ProjectType};
use crate::analysis::validation::{Validate, ValidationError, ValidationRules};
use crate::llm::types::TokenUsage;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Input unit for an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            has_image: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_image(mut self, has_image: bool) -> Self {
        self.has_image = has_image;
        self
    }

    /// Items with ids assigned by position, starting at 1.
    pub fn from_texts<I, S>(texts: I) -> Vec<ContentItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| ContentItem::new(index as u64 + 1, text))
            .collect()
    }

    /// Updated timestamp, falling back to the creation timestamp
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// Compact projection embedded in the structuring prompt
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContentItem<'a> {
    pub id: u64,
    pub content: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_image: bool,
}

impl<'a> From<&'a ContentItem> for AnalysisContentItem<'a> {
    fn from(item: &'a ContentItem) -> Self {
        Self {
            id: item.id,
            content: &item.content,
            has_image: item.has_image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SentimentType {
    Positive,
    Negative,
    Neutral,
}

impl SentimentType {
    pub fn from_average_score(score: f64) -> Self {
        if score < 0.4 {
            SentimentType::Negative
        } else if score >= 0.6 {
            SentimentType::Positive
        } else {
            SentimentType::Neutral
        }
    }
}

/// A content id with its sentiment score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SentimentContent {
    /// Id of the source content item
    pub id: u64,
    /// Sentiment score between 0.0 (very negative) and 1.0 (very positive)
    pub score: f64,
}

/// A quoted passage backing a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HighlightItem {
    /// Id of the source content item
    pub id: u64,
    /// Keyword the passage illustrates
    pub keyword: String,
    /// Short phrase quoted verbatim from the content
    pub highlight: String,
    /// Sentence of the content that contains the highlight
    pub content: String,
}

/// One category of the structuring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategorySummary {
    /// Human readable category name
    pub name: String,
    /// Stable key: the name with spaces replaced by underscores
    pub key: String,
    /// One-line highlight shown next to the category
    pub display_highlight: String,
    /// Overall sentiment of the category
    pub sentiment_type: SentimentType,
    /// Summary of what the content says about this category
    pub summary: String,
    /// Representative keywords
    pub keywords: Vec<String>,
    /// Content items expressing positive sentiment (score >= 0.5)
    pub positive_contents: Vec<SentimentContent>,
    /// Content items expressing negative sentiment (score < 0.5)
    pub negative_contents: Vec<SentimentContent>,
    /// Supporting passages quoted from the content
    pub highlights: Vec<HighlightItem>,
}

impl CategorySummary {
    pub fn key_for(name: &str) -> String {
        name.trim().replace(' ', "_")
    }

    pub fn positive_count(&self) -> usize {
        self.positive_contents.len()
    }

    pub fn negative_count(&self) -> usize {
        self.negative_contents.len()
    }

    pub fn counted_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.positive_contents
            .iter()
            .chain(self.negative_contents.iter())
            .map(|content| content.id)
    }

    fn average_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .positive_contents
            .iter()
            .chain(self.negative_contents.iter())
            .map(|content| content.score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Content excluded from every category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EtcContent {
    /// Id of the excluded content item
    pub id: u64,
    /// Why the item does not belong to any category
    pub reason: String,
}

/// Output of the structuring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredAnalysisResult {
    /// Overall summary of all content
    pub summary: String,
    /// Categories ordered by importance
    pub categories: Vec<CategorySummary>,
    /// Ids of content flagged as harmful (abuse, spam, personal data)
    pub harmful_contents: Vec<u64>,
    /// Content that fits no category
    pub etc_contents: Vec<EtcContent>,
}

impl Validate for StructuredAnalysisResult {
    fn validate(&self, rules: &ValidationRules) -> Result<(), ValidationError> {
        let mut keys = HashSet::new();
        for category in &self.categories {
            if !keys.insert(category.key.as_str()) {
                return Err(ValidationError::new(
                    "categories",
                    format!("duplicate category key '{}'", category.key),
                ));
            }
        }

        // Each content id may be claimed once; highlights are exempt.
        let mut owner: HashMap<u64, String> = HashMap::new();
        let mut claim = |id: u64, bucket: String| -> Result<(), ValidationError> {
            match owner.get(&id) {
                Some(existing) if *existing != bucket => Err(ValidationError::new(
                    "contents",
                    format!("content id {} appears in both {} and {}", id, existing, bucket),
                )),
                Some(_) => Err(ValidationError::new(
                    "contents",
                    format!("content id {} appears twice in {}", id, bucket),
                )),
                None => {
                    owner.insert(id, bucket);
                    Ok(())
                }
            }
        };
        for id in &self.harmful_contents {
            claim(*id, "harmful_contents".to_string())?;
        }
        for etc in &self.etc_contents {
            claim(etc.id, "etc_contents".to_string())?;
        }
        for category in &self.categories {
            for id in category.counted_ids() {
                claim(id, format!("category '{}'", category.key))?;
            }
        }

        if rules.strict {
            self.validate_strict(rules)?;
        }
        Ok(())
    }
}

impl StructuredAnalysisResult {
    fn validate_strict(&self, rules: &ValidationRules) -> Result<(), ValidationError> {
        if self.categories.len() > rules.max_categories {
            return Err(ValidationError::new(
                "categories",
                format!(
                    "{} categories exceed the limit of {}",
                    self.categories.len(),
                    rules.max_categories
                ),
            ));
        }

        for category in &self.categories {
            let field = format!("categories.{}", category.key);
            if category.key != CategorySummary::key_for(&category.name) {
                return Err(ValidationError::new(
                    &field,
                    format!("key does not match name '{}'", category.name),
                ));
            }
            if let Some(bad) = category
                .positive_contents
                .iter()
                .chain(category.negative_contents.iter())
                .find(|content| !(0.0..=1.0).contains(&content.score))
            {
                return Err(ValidationError::new(
                    &field,
                    format!("score {} of content {} is outside [0, 1]", bad.score, bad.id),
                ));
            }
            if let Some(bad) = category.positive_contents.iter().find(|c| c.score < 0.5) {
                return Err(ValidationError::new(
                    &field,
                    format!("positive content {} has score {} < 0.5", bad.id, bad.score),
                ));
            }
            if let Some(bad) = category.negative_contents.iter().find(|c| c.score >= 0.5) {
                return Err(ValidationError::new(
                    &field,
                    format!("negative content {} has score {} >= 0.5", bad.id, bad.score),
                ));
            }
            if let Some(average) = category.average_score() {
                let expected = SentimentType::from_average_score(average);
                if expected != category.sentiment_type {
                    return Err(ValidationError::new(
                        &field,
                        format!(
                            "sentiment {:?} inconsistent with average score {:.2}",
                            category.sentiment_type, average
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Per-category slice of the refinement input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementCategoryInput {
    pub key: String,
    pub summary: String,
    pub keywords: Vec<String>,
}

/// Reduced projection of the structuring result fed to the refinement pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementInput {
    pub summary: String,
    pub categories: Vec<RefinementCategoryInput>,
}

impl From<&StructuredAnalysisResult> for RefinementInput {
    fn from(result: &StructuredAnalysisResult) -> Self {
        Self {
            summary: result.summary.clone(),
            categories: result
                .categories
                .iter()
                .map(|category| RefinementCategoryInput {
                    key: category.key.clone(),
                    summary: category.summary.clone(),
                    keywords: category.keywords.clone(),
                })
                .collect(),
        }
    }
}

/// Rewritten summary for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefinedCategorySummary {
    /// Key of the category being refined, copied from the input
    pub key: String,
    /// Refined category summary
    pub summary: String,
    /// Refined keywords
    pub keywords: Vec<String>,
}

/// Output of the refinement pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefinedSummary {
    /// Refined overall summary
    pub summary: String,
    /// Refined overall keywords
    pub keywords: Vec<String>,
    /// Refined category summaries, keyed by the input category keys
    pub categories: Vec<RefinedCategorySummary>,
}

impl Validate for RefinedSummary {
    fn validate(&self, rules: &ValidationRules) -> Result<(), ValidationError> {
        let mut keys = HashSet::new();
        for category in &self.categories {
            if !keys.insert(category.key.as_str()) {
                return Err(ValidationError::new(
                    "categories",
                    format!("duplicate refined key '{}'", category.key),
                ));
            }
        }

        if rules.strict {
            let length = self.summary.chars().count();
            if length > rules.max_main_summary_chars {
                return Err(ValidationError::new(
                    "summary",
                    format!(
                        "{} characters exceed the limit of {}",
                        length, rules.max_main_summary_chars
                    ),
                ));
            }
            for category in &self.categories {
                let length = category.summary.chars().count();
                if length > rules.max_category_summary_chars {
                    return Err(ValidationError::new(
                        &format!("categories.{}.summary", category.key),
                        format!(
                            "{} characters exceed the limit of {}",
                            length, rules.max_category_summary_chars
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Category of the merged result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalCategory {
    pub name: String,
    pub key: String,
    pub display_highlight: String,
    pub sentiment_type: SentimentType,
    pub summary: String,
    pub keywords: Vec<String>,
    pub positive_count: usize,
    pub negative_count: usize,
    pub highlights: Vec<HighlightItem>,
}

/// Structuring result with refined text merged in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub summary: String,
    pub keywords: Vec<String>,
    pub categories: Vec<FinalCategory>,
    pub harmful_contents: Vec<u64>,
    pub etc_contents: Vec<EtcContent>,
}

/// Usage record for one generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmUsageInfo {
    pub step: u32,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl LlmUsageInfo {
    /// Record with costs derived from the pricing table.
    pub fn new(step: u32, model: impl Into<String>, usage: TokenUsage, duration_ms: u64) -> Self {
        let model = model.into();
        let cost = crate::analysis::pricing::calculate_cost(&model, &usage);
        Self {
            step,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            duration_ms,
            input_cost: cost.map(|c| c.input_cost),
            output_cost: cost.map(|c| c.output_cost),
            total_cost: cost.map(|c| c.total_cost),
            model,
        }
    }
}

/// Versioned result of one analysis, as persisted and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysisResult {
    pub version: u32,
    pub project_id: u64,
    pub project_type: ProjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    pub mode: AnalysisMode,
    /// Persona that ran the structuring pass
    pub meta_persona: PersonaType,
    /// Persona that ran the refinement pass
    pub persona: PersonaType,
    /// Structuring pass output
    pub meta_data: StructuredAnalysisResult,
    /// Merged output
    pub data: FinalResult,
    /// One record per generation step, in execution order
    #[serde(default)]
    pub usages: Vec<LlmUsageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_content_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
