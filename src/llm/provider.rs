use crate::llm::types::{ChatMessage, LlmError, LlmResponse, PersonaConfig, ProviderType};
use futures::future::BoxFuture;

/// Handle to one backend's generation endpoint, bound to a single persona.
///
/// A session can only be obtained from an initialized [`ProviderFactory`], so every
/// value of this trait already owns a constructed backend client.
pub trait ProviderSession: Send + Sync {
    /// Stateless single generation. Does not touch the exchange history.
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<LlmResponse, LlmError>>;

    /// Begin a multi-turn exchange. Starting twice keeps the existing history.
    fn start_exchange(&self) -> BoxFuture<'_, Result<(), LlmError>>;

    /// Send the next user turn of a started exchange
    fn continue_exchange<'a>(
        &'a self,
        message: &'a str,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>>;

    /// Messages exchanged so far, oldest first
    fn history(&self) -> BoxFuture<'_, Vec<ChatMessage>>;

    /// Drop the exchange history; a new exchange must be started afterwards.
    fn reset_exchange(&self) -> BoxFuture<'_, ()>;

    /// Model identifier the session was opened with
    fn model(&self) -> &str;
}

/// Creates sessions for one backend and exposes token counting.
pub trait ProviderFactory: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Construct the backend client (credential resolution, endpoint binding).
    ///
    /// Implementations must be idempotent: the client is built at most once and later
    /// calls observe the existing instance.
    fn initialize(&self) -> BoxFuture<'_, Result<(), LlmError>>;

    fn is_initialized(&self) -> bool;

    /// Open a session for `persona`, initializing the client first if needed.
    fn start_session(
        &self,
        persona: PersonaConfig,
    ) -> BoxFuture<'_, Result<Box<dyn ProviderSession>, LlmError>>;

    /// Exact token count when the backend offers one, otherwise a length estimate.
    /// Never fails.
    fn count_tokens<'a>(&'a self, text: &'a str, model: &'a str) -> BoxFuture<'a, u64>;
}
