//! Environment constants and path utilities for review-insights.
//!
//! This module centralizes file names, environment variable names and built-in
//! defaults used throughout the application, making them easier to maintain.

use std::path::{Path, PathBuf};

/// Application directory name under the user config root
pub const APP_DIR_NAME: &str = "review-insights";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "review-insights.toml";

/// Placeholder printed instead of credentials
pub const REDACTED: &str = "***";

/// Environment variable names read by the config layer
pub mod vars {
    pub const LLM_PROVIDER: &str = "LLM_PROVIDER";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_ORG_ID: &str = "OPENAI_ORG_ID";
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
    pub const VERTEX_AI_LOCATION: &str = "VERTEX_AI_LOCATION";
    pub const VERTEX_AI_ACCESS_TOKEN: &str = "VERTEX_AI_ACCESS_TOKEN";
}

/// Built-in defaults
pub mod defaults {
    pub const VERTEX_AI_LOCATION: &str = "us-central1";
    pub const VERTEX_AI_MODEL_PRO: &str = "gemini-2.5-pro";
    pub const VERTEX_AI_MODEL_FLASH: &str = "gemini-2.5-flash";

    pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    pub const OPENAI_MODEL_PRO: &str = "gpt-4o";
    pub const OPENAI_MODEL_FLASH: &str = "gpt-4o-mini";

    pub const REQUEST_TIMEOUT_SECS: u64 = 300;

    pub const MAX_MAIN_SUMMARY_CHARS: usize = 300;
    pub const MAX_CATEGORY_SUMMARY_CHARS: usize = 50;
    pub const MAX_CATEGORIES: usize = 20;

    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 1000;

    /// Upper bound for a single rate-limit backoff, in seconds
    pub const MAX_BACKOFF_SECS: f64 = 60.0;
    /// Lower bound for a single rate-limit backoff, in seconds
    pub const MIN_BACKOFF_SECS: f64 = 1.0;
    /// Relative jitter applied to rate-limit backoff
    pub const BACKOFF_JITTER: f64 = 0.2;

    /// Characters per token for length based estimates
    pub const VERTEX_CHARS_PER_TOKEN: f64 = 2.0;
    pub const OPENAI_CHARS_PER_TOKEN: f64 = 4.0;

    /// Characters of the last raw response kept in logs on terminal failure
    pub const RESPONSE_PREVIEW_CHARS: usize = 500;
}

/// Build the user config file path from a config root such as `~/.config`
pub fn user_config_file_path(config_root: &Path) -> PathBuf {
    config_root.join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}
