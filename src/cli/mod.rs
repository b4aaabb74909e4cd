//! CLI-specific functionality for review-insights
//!
//! Argument parsing and the execution modes derived from it.

pub mod args;

pub use args::{AnalyzeConfig, Args, Commands, ExecutionMode, SchemaConfig, SchemaTarget};
