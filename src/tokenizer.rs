//! Byte-pair tokenizer shared with the target embedding model.
//!
//! Chunk budgets (`max_tokens`, `overlap_tokens`, `min_tokens`) are only
//! meaningful if they are counted in the same vocabulary the embedding API
//! enforces, so the assembler tokenizes with `tiktoken`'s `cl100k_base`
//! encoding rather than approximating by characters or words.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::types::PipelineError;

/// Cheap-to-clone wrapper around a [`CoreBPE`] encoding.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// The `cl100k_base` encoding used by the OpenAI embedding models.
    pub fn cl100k() -> Result<Self, PipelineError> {
        let bpe =
            tiktoken_rs::cl100k_base().map_err(|err| PipelineError::Tokenizer(err.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Resolves the encoding for a model name, falling back to `cl100k_base`
    /// for models tiktoken does not know about.
    pub fn for_model(model: &str) -> Result<Self, PipelineError> {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Ok(Self { bpe: Arc::new(bpe) }),
            Err(_) => Self::cl100k(),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    /// Decodes a token slice back to text.
    ///
    /// Arbitrary slices of a BPE stream can split a multi-byte character;
    /// that surfaces as a tokenizer error here instead of a panic, and the
    /// caller skips the affected document.
    pub fn decode(&self, tokens: &[u32]) -> Result<String, PipelineError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|err| PipelineError::Tokenizer(err.to_string()))
    }
}
