//! LLM provider implementations.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;

use crate::config::{LlmConfig, ProvidersConfig};

use super::{LlmProvider, ProviderKind};

/// Create the configured provider.
#[must_use]
pub fn create_provider(
    kind: ProviderKind,
    providers: &ProvidersConfig,
    llm: &LlmConfig,
) -> Arc<dyn LlmProvider> {
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(&providers.openai, llm)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(&providers.anthropic, llm)),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(&providers.ollama, llm)),
    }
}
