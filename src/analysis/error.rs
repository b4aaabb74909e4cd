use crate::analysis::store::StoreError;
use crate::llm::schema::SchemaError;
use crate::llm::types::LlmError;
use std::fmt;

/// Which stage kept failing when the retry budget ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The text never parsed as JSON, even after repair
    Parsing,
    /// JSON parsed but never passed deserialization or business rules
    Validation,
    /// The backend call itself kept failing
    Generation,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCause::Parsing => "JSON parsing error",
            FailureCause::Validation => "Validation error",
            FailureCause::Generation => "Generation error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{context}: {cause} after {attempts} attempts: {message}")]
    RetryExhausted {
        context: String,
        cause: FailureCause,
        attempts: u32,
        message: String,
        last_response: Option<String>,
    },
    #[error("No analyzable content for {0}")]
    NoContent(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AnalysisError {
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            AnalysisError::RetryExhausted { cause, .. } => Some(*cause),
            _ => None,
        }
    }
}
