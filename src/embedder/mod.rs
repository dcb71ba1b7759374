//! Embedding clients and the trait the rest of the crate consumes.

use anyhow::Result;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Trait implemented by concrete embedding backends.
///
/// The corpus and every incoming question must pass through the same
/// implementation so query vectors share the index's embedding space.
pub trait Embedder: Send + Sync {
    /// Embeds a batch of inputs, returning one vector per input in order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single input.
    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[input])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding backend returned no vector"))
    }
}
