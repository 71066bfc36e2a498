//! Embedding provider seam.
//!
//! The pipeline only needs "texts in, optional vectors out"; wiring a real
//! API client in behind [`EmbeddingProvider`] keeps the chunking path free of
//! network concerns and lets tests run against a deterministic mock.

use std::hash::Hasher;

use async_trait::async_trait;
use rustc_hash::FxHasher;

use crate::types::PipelineError;

/// A source of embedding vectors for chunk texts.
///
/// `embed` returns one slot per input, in order. A `None` slot means the
/// provider could not embed that text; callers leave the chunk pending
/// rather than failing the run.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, used as the embedding-store key.
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, PipelineError>;
}

/// Deterministic test provider: the vector is a pure function of the text.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    model: String,
    dimension: usize,
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new("mock-embed", 8)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, PipelineError> {
        Ok(texts
            .iter()
            .map(|text| {
                let vector = (0..self.dimension)
                    .map(|component| {
                        let mut hasher = FxHasher::default();
                        hasher.write(text.as_bytes());
                        hasher.write_usize(component);
                        (hasher.finish() % 1000) as f32 / 1000.0
                    })
                    .collect();
                Some(vector)
            })
            .collect())
    }
}

/// Provider that embeds nothing; every chunk stays pending.
#[derive(Debug, Clone, Default)]
pub struct NullEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn model(&self) -> &str {
        "null"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, PipelineError> {
        Ok(vec![None; texts.len()])
    }
}
