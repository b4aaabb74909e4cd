//! Provider-neutral LLM layer: response model, session/factory traits, registry,
//! schema adapter, and one module per backend.

pub mod openai_provider;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod types;
pub mod vertex_provider;

pub use openai_provider::OpenAiFactory;
pub use provider::{ProviderFactory, ProviderSession};
pub use registry::ProviderRegistry;
pub use schema::{SchemaError, describe_schema, to_backend_schema, to_strict_schema};
pub use types::*;
pub use vertex_provider::VertexAiFactory;
