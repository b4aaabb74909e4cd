use crate::config::AnalysisSettings;

/// Domain rule violation found after a model response was parsed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Limits applied when validating model output.
///
/// Structural invariants (unique keys, disjoint content ids) always hold; the
/// remaining rules are only enforced when `strict` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub strict: bool,
    pub max_categories: usize,
    pub max_main_summary_chars: usize,
    pub max_category_summary_chars: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&AnalysisSettings::default())
    }
}

impl From<&AnalysisSettings> for ValidationRules {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            strict: settings.strict_validation,
            max_categories: settings.max_categories,
            max_main_summary_chars: settings.max_main_summary_chars,
            max_category_summary_chars: settings.max_category_summary_chars,
        }
    }
}

/// Business validation run after deserialization
pub trait Validate {
    fn validate(&self, rules: &ValidationRules) -> Result<(), ValidationError>;
}
