//! Personas, analysis modes and the project/content tags that travel with a request.

use crate::config::ReviewInsightsConfig;
use crate::llm::types::{PersonaConfig, ProviderType, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Funding,
    Preorder,
    Store,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectType::Funding => "funding",
            ProjectType::Preorder => "preorder",
            ProjectType::Store => "store",
        };
        f.write_str(name)
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "funding" => Ok(ProjectType::Funding),
            "preorder" => Ok(ProjectType::Preorder),
            "store" => Ok(ProjectType::Store),
            other => Err(format!("unknown project type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Support,
    Suggestion,
    Review,
    Satisfaction,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Support => "support",
            ContentType::Suggestion => "suggestion",
            ContentType::Review => "review",
            ContentType::Satisfaction => "satisfaction",
        };
        f.write_str(name)
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "support" => Ok(ContentType::Support),
            "suggestion" => Ok(ContentType::Suggestion),
            "review" => Ok(ContentType::Review),
            "satisfaction" => Ok(ContentType::Satisfaction),
            other => Err(format!("unknown content type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Pro,
    Flash,
}

/// Fixed set of roles the model plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonaType {
    CommonTokenCounter,
    CustomerFacingAnalyst,
    ProDataAnalyst,
    CustomerFacingSmartBot,
}

impl PersonaType {
    pub fn name(&self) -> &'static str {
        match self {
            PersonaType::CommonTokenCounter => "common_token_counter",
            PersonaType::CustomerFacingAnalyst => "customer_facing_analyst",
            PersonaType::ProDataAnalyst => "pro_data_analyst",
            PersonaType::CustomerFacingSmartBot => "customer_facing_smart_bot",
        }
    }

    pub fn tier(&self) -> ModelTier {
        match self {
            PersonaType::CustomerFacingSmartBot => ModelTier::Flash,
            _ => ModelTier::Pro,
        }
    }

    pub fn role(&self) -> Option<&'static str> {
        match self {
            PersonaType::CommonTokenCounter => None,
            PersonaType::CustomerFacingAnalyst => Some("Customer-Facing Data Analyst"),
            PersonaType::ProDataAnalyst => Some("Precise Data Analyst"),
            PersonaType::CustomerFacingSmartBot => Some("Smart AI Review Analyst"),
        }
    }

    /// Sampling temperature, tuned per backend
    pub fn temperature(&self, provider: ProviderType) -> f32 {
        match (self, provider) {
            (PersonaType::CommonTokenCounter, _) => 0.0,
            (PersonaType::CustomerFacingAnalyst, ProviderType::VertexAi) => 0.7,
            (PersonaType::CustomerFacingAnalyst, ProviderType::OpenAi) => 0.5,
            (PersonaType::ProDataAnalyst, ProviderType::VertexAi) => 0.1,
            (PersonaType::ProDataAnalyst, ProviderType::OpenAi) => 0.0,
            (PersonaType::CustomerFacingSmartBot, ProviderType::VertexAi) => 0.3,
            (PersonaType::CustomerFacingSmartBot, ProviderType::OpenAi) => 0.2,
        }
    }

    pub fn model<'a>(&self, provider: ProviderType, config: &'a ReviewInsightsConfig) -> &'a str {
        match (provider, self.tier()) {
            (ProviderType::VertexAi, ModelTier::Pro) => &config.vertex_ai.model_pro,
            (ProviderType::VertexAi, ModelTier::Flash) => &config.vertex_ai.model_flash,
            (ProviderType::OpenAi, ModelTier::Pro) => &config.openai.model_pro,
            (ProviderType::OpenAi, ModelTier::Flash) => &config.openai.model_flash,
        }
    }

    /// Session configuration for this persona on `provider`.
    pub fn config(
        &self,
        provider: ProviderType,
        config: &ReviewInsightsConfig,
        system_instruction: Option<String>,
        response_schema: Option<serde_json::Value>,
    ) -> PersonaConfig {
        PersonaConfig {
            name: self.name().to_string(),
            model: self.model(provider, config).to_string(),
            temperature: self.temperature(provider),
            system_instruction,
            response_format: ResponseFormat::Json,
            response_schema,
        }
    }
}

impl fmt::Display for PersonaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects the persona of the refinement pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    ReviewBot,
    DataAnalyst,
}

impl AnalysisMode {
    pub fn persona(&self) -> PersonaType {
        match self {
            AnalysisMode::ReviewBot => PersonaType::CustomerFacingSmartBot,
            AnalysisMode::DataAnalyst => PersonaType::ProDataAnalyst,
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "review_bot" => Ok(AnalysisMode::ReviewBot),
            "data_analyst" => Ok(AnalysisMode::DataAnalyst),
            other => Err(format!("unknown analysis mode '{}'", other)),
        }
    }
}
