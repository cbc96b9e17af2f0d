//! Embedder trait and batching/truncation helpers used by RAG ingest, entity
//! extraction, and knowledge search.
//!
//! Implementations can wrap OpenAI or mock embedders for tests.

mod mock;
mod openai;

pub use mock::MockEmbedder;
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedding errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("embedding dimension {got} != expected {want}")]
    Dimension { got: usize, want: usize },
}

/// Produces fixed-size float vectors from text. One vector per input, same order.
///
/// Implementations must be `Send + Sync`; callers batch and truncate inputs via
/// [`embed_batched`], so `embed` itself can assume reasonable input sizes.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Batch/truncation settings for embedding calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-text token cap; longer texts are truncated before embedding.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_input_tokens() -> usize {
    7500
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: default_batch_size(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

/// Truncates `text` to `max_input_tokens`, using the conservative bound of 2 characters
/// per token. A truncated text ends with `…`.
pub fn truncate_for_embedding(text: &str, max_input_tokens: usize) -> String {
    let max_chars = max_input_tokens.saturating_mul(2);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Embeds `texts` in batches of `config.batch_size`, truncating each text first.
/// Returns one vector per input, in order.
pub async fn embed_batched(
    embedder: &Arc<dyn Embedder>,
    texts: &[String],
    config: &EmbeddingConfig,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let truncated: Vec<String> = texts
        .iter()
        .map(|t| truncate_for_embedding(t, config.max_input_tokens))
        .collect();
    let mut vectors = Vec::with_capacity(truncated.len());
    for batch in truncated.chunks(config.batch_size.max(1)) {
        let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
        let mut batch_vectors = embedder.embed(&refs).await?;
        for vector in &batch_vectors {
            if vector.len() != embedder.dimension() {
                return Err(EmbedError::Dimension {
                    got: vector.len(),
                    want: embedder.dimension(),
                });
            }
        }
        vectors.append(&mut batch_vectors);
    }
    Ok(vectors)
}
