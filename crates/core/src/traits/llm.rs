//! Text generation capability

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{GenerationParams, Prompt};

/// Language-generation backend
///
/// Implementations:
/// - `OllamaBackend` - local models via `/api/chat`
/// - `OpenAIBackend` - OpenAI-compatible chat completions (OpenAI, Azure, vLLM, Groq)
#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    /// Registry name of this provider
    fn name(&self) -> &str;

    /// Generate a reply for the assembled prompt
    async fn generate_text(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;

    /// Lightweight health probe used for availability reporting
    async fn is_available(&self) -> bool {
        true
    }
}
