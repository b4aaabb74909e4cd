//! Command line argument parsing
//!
//! Subcommands:
//! - `analyze`: Run both analysis passes over a JSON file of content items
//! - `schema`: Print the structured-output schema sent to a backend
//! - `show-config`: Print the effective configuration with secrets redacted

use crate::analysis::persona::{AnalysisMode, ContentType, ProjectType};
use crate::llm::types::ProviderType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Analyze(AnalyzeConfig),
    Schema(SchemaConfig),
    ShowConfig { config_override: Option<PathBuf> },
}

#[derive(Debug)]
pub struct AnalyzeConfig {
    pub input: PathBuf,
    pub project_id: u64,
    pub project_type: ProjectType,
    pub content_type: Option<ContentType>,
    pub mode: AnalysisMode,
    pub provider: Option<ProviderType>,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTarget {
    Structured,
    Refined,
}

#[derive(Debug)]
pub struct SchemaConfig {
    pub target: SchemaTarget,
    pub provider: ProviderType,
}

#[derive(Debug, Parser)]
#[command(name = "review-insights")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Category and sentiment summaries of user reviews through an LLM backend")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Analyze a JSON array of content items
    Analyze {
        /// Path to the JSON input file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        /// Project identifier
        #[arg(long = "project-id")]
        project_id: u64,
        /// Project type (funding, preorder, store)
        #[arg(long = "project-type")]
        project_type: String,
        /// Analysis mode (review-bot, data-analyst)
        #[arg(short = 'm', long = "mode", default_value = "review-bot")]
        mode: String,
        /// Content type (support, suggestion, review, satisfaction)
        #[arg(long = "content-type")]
        content_type: Option<String>,
        /// Backend override (vertex_ai, openai)
        #[arg(short = 'p', long = "provider")]
        provider: Option<String>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Print the backend schema for a result type
    Schema {
        /// Result type (structured, refined)
        #[arg(short = 't', long = "target", default_value = "structured")]
        target: String,
        /// Backend whose schema dialect to use
        #[arg(short = 'p', long = "provider", default_value = "vertex_ai")]
        provider: String,
    },
    /// Show the effective configuration
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Analyze {
                input,
                project_id,
                project_type,
                mode,
                content_type,
                provider,
                config,
            }) => Ok(ExecutionMode::Analyze(AnalyzeConfig {
                input: input.clone(),
                project_id: *project_id,
                project_type: project_type.parse()?,
                content_type: content_type.as_deref().map(str::parse).transpose()?,
                mode: mode.parse()?,
                provider: provider
                    .as_deref()
                    .map(|p| p.parse::<ProviderType>().map_err(|e| e.to_string()))
                    .transpose()?,
                config_override: config.clone(),
            })),
            Some(Commands::Schema { target, provider }) => Ok(ExecutionMode::Schema(SchemaConfig {
                target: Self::parse_target(target)?,
                provider: provider.parse::<ProviderType>().map_err(|e| e.to_string())?,
            })),
            Some(Commands::ShowConfig { config }) => Ok(ExecutionMode::ShowConfig {
                config_override: config.clone(),
            }),
            None => Err(
                "No command specified. Use 'review-insights --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    fn parse_target(target: &str) -> Result<SchemaTarget, String> {
        match target.trim().to_lowercase().as_str() {
            "structured" | "structure" => Ok(SchemaTarget::Structured),
            "refined" | "refine" => Ok(SchemaTarget::Refined),
            other => Err(format!(
                "unknown schema target '{}' (expected structured or refined)",
                other
            )),
        }
    }
}
