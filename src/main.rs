use anyhow::{Context, Result, anyhow};
use review_insights::analysis::{
    AnalysisOrchestrator, AnalysisRequest, AnalysisService, RefinedSummary,
    StructuredAnalysisResult, contents_from_json, select_baseline_content_id,
};
use review_insights::cli::{AnalyzeConfig, Args, ExecutionMode, SchemaConfig, SchemaTarget};
use review_insights::llm::{ProviderRegistry, to_backend_schema};
use review_insights::{ConfigDiscovery, ReviewInsightsConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "review_insights=debug" } else { "review_insights=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = args.mode().map_err(|e| anyhow!(e))?;
    match mode {
        ExecutionMode::Analyze(config) => run_analyze(config).await,
        ExecutionMode::Schema(config) => run_schema(config),
        ExecutionMode::ShowConfig { config_override } => run_show_config(config_override),
    }
}

async fn run_analyze(args: AnalyzeConfig) -> Result<()> {
    let config = ReviewInsightsConfig::load(args.config_override.as_deref())
        .context("Failed to load configuration")?;
    let provider = args.provider.unwrap_or(config.provider);

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input file {:?}", args.input))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Input file {:?} is not valid JSON", args.input))?;
    let items = contents_from_json(&value)?;
    info!("Loaded {} content items from {:?}", items.len(), args.input);

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    registry
        .initialize(provider)
        .await
        .with_context(|| format!("Failed to initialize provider {}", provider))?;

    let orchestrator = AnalysisOrchestrator::new(AnalysisService::new(registry, config));
    let request = AnalysisRequest::new(args.project_id, args.project_type, args.content_type);
    let baseline = select_baseline_content_id(&items);
    let mut result = orchestrator.analyze(&request, items, args.mode).await?;
    result.baseline_content_id = baseline;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_schema(args: SchemaConfig) -> Result<()> {
    let schema = match args.target {
        SchemaTarget::Structured => to_backend_schema::<StructuredAnalysisResult>(args.provider)?,
        SchemaTarget::Refined => to_backend_schema::<RefinedSummary>(args.provider)?,
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn run_show_config(config_override: Option<PathBuf>) -> Result<()> {
    match config_override.clone().or_else(ConfigDiscovery::find_config_file) {
        Some(path) => println!("# Configuration file: {}", path.display()),
        None => println!("# No configuration file found; using defaults"),
    }
    let config = ReviewInsightsConfig::load(config_override.as_deref())
        .context("Failed to load configuration")?;
    print!("{}", config.redacted().to_toml_string()?);
    Ok(())
}
