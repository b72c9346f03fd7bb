// Embedding backends: local Ollama or a remote OpenAI-compatible service.
// Both satisfy the same contract and are selected once at startup.

pub mod ollama;
pub mod openai;

use crate::Result;
use crate::config::{Config, EmbeddingProvider};

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Maps text to fixed-dimension vectors. The dimension is a fixed property
/// of the instance and must match the vector index it feeds.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedder selected by the configuration.
#[inline]
pub fn open_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    match config.embedding.provider {
        EmbeddingProvider::Local => Ok(Box::new(OllamaEmbedder::new(&config.embedding)?)),
        EmbeddingProvider::Remote => Ok(Box::new(OpenAiEmbedder::new(&config.embedding)?)),
    }
}
