//! Chat-completion providers used to synthesize answers.

use anyhow::Result;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Produces a completion for the rendered prompt.
    fn answer(&self, request: &ProviderRequest) -> Result<String>;
}

/// Request envelope shared by the various providers.
pub struct ProviderRequest<'a> {
    /// Fully rendered prompt text.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to request from the completion model.
    pub max_tokens: usize,
}
