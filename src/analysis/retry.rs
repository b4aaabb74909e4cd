//! Validation-retry engine
//!
//! Turns free-form model output into a validated domain object. Each attempt re-runs
//! the caller's generation closure, strips code fences, parses (with bounded repair
//! passes), deserializes and validates. Failures are retried after a fixed delay,
//! except rate-limit shaped errors which back off exponentially with jitter.
//!
//! ## Terminal failure
//!
//! After `max_retries + 1` attempts the engine returns
//! [`AnalysisError::RetryExhausted`] naming the stage that failed last and carrying
//! the last raw response.

use crate::analysis::error::{AnalysisError, FailureCause};
use crate::analysis::validation::{Validate, ValidationRules};
use crate::config::AnalysisSettings;
use crate::env::defaults::{
    BACKOFF_JITTER, MAX_BACKOFF_SECS, MIN_BACKOFF_SECS, RESPONSE_PREVIEW_CHARS,
};
use crate::llm::types::{LlmError, TokenUsage};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

static TRAILING_COMMA_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("static regex"));
static TRAILING_COMMA_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\]").expect("static regex"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay after a failure that is not rate-limit shaped
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&AnalysisSettings::default())
    }
}

impl From<&AnalysisSettings> for RetryConfig {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// A generation error together with the tokens the backend billed for the attempt.
#[derive(Debug)]
pub struct FailedAttempt {
    pub error: LlmError,
    pub usage: TokenUsage,
}

impl FailedAttempt {
    pub fn billed(error: LlmError, usage: TokenUsage) -> Self {
        Self { error, usage }
    }
}

impl From<LlmError> for FailedAttempt {
    fn from(error: LlmError) -> Self {
        Self::billed(error, TokenUsage::default())
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Generation(LlmError),
    Parsing(String),
    Validation(String),
}

impl AttemptFailure {
    fn cause(&self) -> FailureCause {
        match self {
            AttemptFailure::Generation(_) => FailureCause::Generation,
            AttemptFailure::Parsing(_) => FailureCause::Parsing,
            AttemptFailure::Validation(_) => FailureCause::Validation,
        }
    }

    fn is_rate_limit(&self) -> bool {
        matches!(self, AttemptFailure::Generation(e) if e.is_rate_limit())
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Generation(e) => write!(f, "{}", e),
            AttemptFailure::Parsing(msg) | AttemptFailure::Validation(msg) => f.write_str(msg),
        }
    }
}

/// Backoff for the `attempt`-th rate-limit failure (starting at 0).
pub fn rate_limit_backoff(attempt: u32) -> Duration {
    backoff_with_jitter(attempt, rand::random::<f64>())
}

/// Deterministic core of [`rate_limit_backoff`]; `sample` is uniform in `[0, 1)`.
///
/// `min(2^attempt, 60)` seconds, jittered by ±20%, never below one second.
pub fn backoff_with_jitter(attempt: u32, sample: f64) -> Duration {
    let base = 2f64.powi(attempt.min(16) as i32).min(MAX_BACKOFF_SECS);
    let jitter = base * BACKOFF_JITTER * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
    Duration::from_secs_f64((base + jitter).max(MIN_BACKOFF_SECS))
}

/// Strips surrounding whitespace and Markdown code fences.
pub fn clean_response_text(text: &str) -> String {
    text.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parses `text` as JSON, retrying with trailing-comma removal and then whitespace
/// collapsing when the plain parse fails.
pub fn parse_json_lenient(text: &str) -> Result<Value, serde_json::Error> {
    let cleaned = clean_response_text(text);
    let first_error = match serde_json::from_str(&cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let without_commas = TRAILING_COMMA_OBJECT.replace_all(&cleaned, "}");
    let without_commas = TRAILING_COMMA_ARRAY.replace_all(&without_commas, "]").into_owned();
    if without_commas != cleaned {
        if let Ok(value) = serde_json::from_str(&without_commas) {
            debug!("Recovered JSON after removing trailing commas");
            return Ok(value);
        }
    }

    let collapsed = WHITESPACE_RUN.replace_all(&without_commas, " ").into_owned();
    if collapsed != without_commas {
        if let Ok(value) = serde_json::from_str(&collapsed) {
            debug!("Recovered JSON after collapsing whitespace");
            return Ok(value);
        }
    }

    Err(first_error)
}

fn preview(text: &str) -> String {
    let count = text.chars().count();
    if count <= RESPONSE_PREVIEW_CHARS * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(RESPONSE_PREVIEW_CHARS).collect();
    let tail: String = text.chars().skip(count - RESPONSE_PREVIEW_CHARS).collect();
    format!("{} ... {}", head, tail)
}

fn parse_and_validate<T>(text: &str, rules: &ValidationRules) -> Result<T, AttemptFailure>
where
    T: DeserializeOwned + Validate,
{
    let value = parse_json_lenient(text).map_err(|e| AttemptFailure::Parsing(e.to_string()))?;

    let value = match value {
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => {
            warn!("Model returned a single-element array; using its only element");
            items.remove(0)
        }
        other => other,
    };

    let parsed: T =
        serde_json::from_value(value).map_err(|e| AttemptFailure::Validation(e.to_string()))?;
    parsed
        .validate(rules)
        .map_err(|e| AttemptFailure::Validation(e.to_string()))?;
    Ok(parsed)
}

#[derive(Debug, Clone)]
pub struct ValidationRetry {
    config: RetryConfig,
    rules: ValidationRules,
}

impl ValidationRetry {
    pub fn new(config: RetryConfig, rules: ValidationRules) -> Self {
        Self { config, rules }
    }

    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self::new(RetryConfig::from(settings), ValidationRules::from(settings))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Runs `generate` until its text parses and validates as `T`.
    pub async fn validate_with_retry<T, F, Fut>(
        &self,
        mut generate: F,
        context: &str,
    ) -> Result<T, AnalysisError>
    where
        T: DeserializeOwned + Validate,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, LlmError>>,
    {
        self.validate_with_retry_and_usage(
            || {
                let attempt = generate();
                async move {
                    attempt
                        .await
                        .map(|text| (text, TokenUsage::default()))
                        .map_err(FailedAttempt::from)
                }
            },
            context,
        )
        .await
        .map(|(value, _)| value)
    }

    /// Like [`Self::validate_with_retry`], also summing token usage over every attempt
    /// that reached the backend, failed ones included. A [`FailedAttempt`] carries the
    /// usage of a response that was returned but unusable.
    pub async fn validate_with_retry_and_usage<T, F, Fut>(
        &self,
        mut generate: F,
        context: &str,
    ) -> Result<(T, TokenUsage), AnalysisError>
    where
        T: DeserializeOwned + Validate,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(String, TokenUsage), FailedAttempt>>,
    {
        let attempts = self.config.max_retries + 1;
        let mut total_usage = TokenUsage::default();
        let mut last_failure: Option<AttemptFailure> = None;
        let mut last_response: Option<String> = None;

        for attempt in 0..attempts {
            let failure = match generate().await {
                Ok((text, usage)) => {
                    total_usage.merge(&usage);
                    match parse_and_validate::<T>(&text, &self.rules) {
                        Ok(value) => {
                            if attempt > 0 {
                                info!("{}: succeeded on attempt {}/{}", context, attempt + 1, attempts);
                            }
                            return Ok((value, total_usage));
                        }
                        Err(failure) => {
                            last_response = Some(text);
                            failure
                        }
                    }
                }
                Err(FailedAttempt { error, usage }) => {
                    total_usage.merge(&usage);
                    if !error.is_retryable() {
                        error!("{}: non-retryable error: {}", context, error);
                        return Err(AnalysisError::Llm(error));
                    }
                    AttemptFailure::Generation(error)
                }
            };

            warn!(
                "{}: attempt {}/{} failed ({}): {}",
                context,
                attempt + 1,
                attempts,
                failure.cause(),
                failure
            );

            if attempt + 1 < attempts {
                let delay = if failure.is_rate_limit() {
                    rate_limit_backoff(attempt)
                } else {
                    self.config.retry_delay
                };
                debug!("{}: retrying in {:?}", context, delay);
                tokio::time::sleep(delay).await;
            }
            last_failure = Some(failure);
        }

        let (cause, message) = match last_failure {
            Some(failure) => (failure.cause(), failure.to_string()),
            None => (FailureCause::Generation, "no attempts were made".to_string()),
        };
        error!("{}: {} after {} attempts: {}", context, cause, attempts, message);
        if let Some(response) = &last_response {
            error!("{}: last response: {}", context, preview(response));
        }

        Err(AnalysisError::RetryExhausted {
            context: context.to_string(),
            cause,
            attempts,
            message,
            last_response,
        })
    }
}
