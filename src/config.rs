//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit path passed on the command line
//! 2. Current directory: ./review-insights.toml
//! 3. User config: $XDG_CONFIG_HOME/review-insights/config.toml (or ~/.config/...)
//! 4. Built-in defaults
//!
//! Environment variables are applied on top of whatever was loaded, so credentials
//! never need to live in the file.

use crate::env;
use crate::llm::types::ProviderType;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewInsightsConfig {
    pub provider: ProviderType,
    pub vertex_ai: VertexAiConfig,
    pub openai: OpenAiConfig,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexAiConfig {
    pub project_id: Option<String>,
    pub location: String,
    pub access_token: Option<String>,
    /// Overrides `https://{location}-aiplatform.googleapis.com`
    pub endpoint: Option<String>,
    pub model_pro: String,
    pub model_flash: String,
    pub request_timeout_secs: u64,
}

impl Default for VertexAiConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: env::defaults::VERTEX_AI_LOCATION.to_string(),
            access_token: None,
            endpoint: None,
            model_pro: env::defaults::VERTEX_AI_MODEL_PRO.to_string(),
            model_flash: env::defaults::VERTEX_AI_MODEL_FLASH.to_string(),
            request_timeout_secs: env::defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl VertexAiConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub base_url: String,
    pub model_pro: String,
    pub model_flash: String,
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            base_url: env::defaults::OPENAI_BASE_URL.to_string(),
            model_pro: env::defaults::OPENAI_MODEL_PRO.to_string(),
            model_flash: env::defaults::OPENAI_MODEL_FLASH.to_string(),
            request_timeout_secs: env::defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Limits and retry knobs for the analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub max_main_summary_chars: usize,
    pub max_category_summary_chars: usize,
    pub max_categories: usize,
    pub strict_validation: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_main_summary_chars: env::defaults::MAX_MAIN_SUMMARY_CHARS,
            max_category_summary_chars: env::defaults::MAX_CATEGORY_SUMMARY_CHARS,
            max_categories: env::defaults::MAX_CATEGORIES,
            strict_validation: false,
            max_retries: env::defaults::MAX_RETRIES,
            retry_delay_ms: env::defaults::RETRY_DELAY_MS,
        }
    }
}

impl ReviewInsightsConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, otherwise the first discovered file, otherwise
    /// defaults; environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                Self::from_toml_file(path)?
            }
            None => ConfigDiscovery::discover_config()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(provider) = read_env(env::vars::LLM_PROVIDER) {
            self.provider =
                ProviderType::from_str(&provider).map_err(|e| ConfigError::InvalidValue {
                    key: env::vars::LLM_PROVIDER.to_string(),
                    message: e.to_string(),
                })?;
        }
        if let Some(key) = read_env(env::vars::OPENAI_API_KEY) {
            self.openai.api_key = Some(key);
        }
        if let Some(org) = read_env(env::vars::OPENAI_ORG_ID) {
            self.openai.organization = Some(org);
        }
        if let Some(url) = read_env(env::vars::OPENAI_BASE_URL) {
            self.openai.base_url = url;
        }
        if let Some(project) = read_env(env::vars::GOOGLE_CLOUD_PROJECT) {
            self.vertex_ai.project_id = Some(project);
        }
        if let Some(location) = read_env(env::vars::VERTEX_AI_LOCATION) {
            self.vertex_ai.location = location;
        }
        if let Some(token) = read_env(env::vars::VERTEX_AI_ACCESS_TOKEN) {
            self.vertex_ai.access_token = Some(token);
        }
        Ok(())
    }

    /// Copy with credentials replaced, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.openai.api_key.is_some() {
            copy.openai.api_key = Some(env::REDACTED.to_string());
        }
        if copy.vertex_ai.access_token.is_some() {
            copy.vertex_ai.access_token = Some(env::REDACTED.to_string());
        }
        copy
    }
}

fn read_env(key: &str) -> Option<String> {
    std_env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    pub fn discover_config() -> Result<ReviewInsightsConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ReviewInsightsConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(ReviewInsightsConfig::default())
    }

    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Candidate paths in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
        }

        match read_env("XDG_CONFIG_HOME") {
            Some(xdg) => candidates.push(env::user_config_file_path(Path::new(&xdg))),
            None => match Self::home_dir() {
                Some(home) => candidates.push(env::user_config_file_path(&home.join(".config"))),
                None => warn!("Could not determine home directory for config discovery"),
            },
        }

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ReviewInsightsConfig::default();
        assert_eq!(config.provider, ProviderType::VertexAi);
        assert_eq!(config.vertex_ai.model_pro, "gemini-2.5-pro");
        assert_eq!(config.openai.model_flash, "gpt-4o-mini");
        assert_eq!(config.analysis.max_main_summary_chars, 300);
        assert_eq!(config.analysis.max_category_summary_chars, 50);
        assert_eq!(config.analysis.max_retries, 3);
        assert!(!config.analysis.strict_validation);
        assert_eq!(
            config.vertex_ai.endpoint(),
            "https://us-central1-aiplatform.googleapis.com"
        );
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = ReviewInsightsConfig::from_toml_str(
            r#"
provider = "openai"

[openai]
model_pro = "gpt-4.1"

[analysis]
strict_validation = true
"#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderType::OpenAi);
        assert_eq!(config.openai.model_pro, "gpt-4.1");
        assert_eq!(config.openai.model_flash, "gpt-4o-mini");
        assert!(config.analysis.strict_validation);
        assert_eq!(config.analysis.max_categories, 20);
    }

    #[test]
    fn test_config_file_operations() {
        let mut original = ReviewInsightsConfig::default();
        original.vertex_ai.project_id = Some("insights-prod".to_string());
        original.analysis.max_retries = 5;

        let temp_file = NamedTempFile::new().unwrap();
        original.to_toml_file(temp_file.path()).unwrap();
        let loaded = ReviewInsightsConfig::from_toml_file(temp_file.path()).unwrap();

        assert_eq!(loaded.vertex_ai.project_id.as_deref(), Some("insights-prod"));
        assert_eq!(loaded.analysis.max_retries, 5);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ReviewInsightsConfig::from_toml_file("/nonexistent/review-insights.toml")
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/review-insights.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std_env::set_var(env::vars::LLM_PROVIDER, "openai");
            std_env::set_var(env::vars::OPENAI_API_KEY, "sk-test");
            std_env::set_var(env::vars::VERTEX_AI_LOCATION, "asia-northeast3");
        }

        let mut config = ReviewInsightsConfig::default();
        let result = config.apply_env_overrides();

        unsafe {
            std_env::remove_var(env::vars::LLM_PROVIDER);
            std_env::remove_var(env::vars::OPENAI_API_KEY);
            std_env::remove_var(env::vars::VERTEX_AI_LOCATION);
        }

        result.unwrap();
        assert_eq!(config.provider, ProviderType::OpenAi);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.vertex_ai.location, "asia-northeast3");

        let redacted = config.redacted();
        assert_eq!(redacted.openai.api_key.as_deref(), Some(env::REDACTED));
    }

    #[test]
    #[serial]
    fn test_invalid_provider_env_is_rejected() {
        unsafe {
            std_env::set_var(env::vars::LLM_PROVIDER, "anthropic");
        }
        let mut config = ReviewInsightsConfig::default();
        let result = config.apply_env_overrides();
        unsafe {
            std_env::remove_var(env::vars::LLM_PROVIDER);
        }

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
