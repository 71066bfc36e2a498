//! Pipeline configuration with environment overrides.
//!
//! Resolution order (later wins): compiled defaults, then `CHUNKSMITH_*`
//! environment variables loaded via `dotenvy`. All builder setters are
//! `#[must_use]`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Settings the chunking and caching engine runs under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,
    /// Token overlap carried from a finalized chunk into the next.
    pub overlap_tokens: usize,
    /// Chunks below this token count are scored as low-signal.
    pub min_tokens: usize,
    /// Embedding model the tokenizer vocabulary must match.
    pub embed_model: String,
    /// Batch size for embedding requests.
    pub embed_batch_size: usize,
    /// Path of the source list this run was configured from; part of the
    /// cache fingerprint so switching source files invalidates cached chunks.
    pub sources_file: String,
    /// Directory the pipeline cache persists its stores under.
    pub cache_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens: 700,
            overlap_tokens: 80,
            min_tokens: 40,
            embed_model: "text-embedding-3-small".to_string(),
            embed_batch_size: 64,
            sources_file: "sources.yaml".to_string(),
            cache_dir: PathBuf::from("data/cache"),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults, a `.env` file if present, then environment overrides:
    /// `CHUNKSMITH_MAX_TOKENS`, `CHUNKSMITH_OVERLAP_TOKENS`,
    /// `CHUNKSMITH_MIN_TOKENS`, `CHUNKSMITH_EMBED_MODEL`,
    /// `CHUNKSMITH_EMBED_BATCH`, `CHUNKSMITH_SOURCES_FILE`,
    /// `CHUNKSMITH_CACHE_DIR`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(value) = env_usize("CHUNKSMITH_MAX_TOKENS")? {
            config.max_tokens = value;
        }
        if let Some(value) = env_usize("CHUNKSMITH_OVERLAP_TOKENS")? {
            config.overlap_tokens = value;
        }
        if let Some(value) = env_usize("CHUNKSMITH_MIN_TOKENS")? {
            config.min_tokens = value;
        }
        if let Ok(value) = std::env::var("CHUNKSMITH_EMBED_MODEL") {
            config.embed_model = value;
        }
        if let Some(value) = env_usize("CHUNKSMITH_EMBED_BATCH")? {
            config.embed_batch_size = value;
        }
        if let Ok(value) = std::env::var("CHUNKSMITH_SOURCES_FILE") {
            config.sources_file = value;
        }
        if let Ok(value) = std::env::var("CHUNKSMITH_CACHE_DIR") {
            config.cache_dir = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn max_tokens(mut self, value: usize) -> Self {
        self.max_tokens = value;
        self
    }

    #[must_use]
    pub fn overlap_tokens(mut self, value: usize) -> Self {
        self.overlap_tokens = value;
        self
    }

    #[must_use]
    pub fn min_tokens(mut self, value: usize) -> Self {
        self.min_tokens = value;
        self
    }

    #[must_use]
    pub fn embed_model(mut self, value: impl Into<String>) -> Self {
        self.embed_model = value.into();
        self
    }

    #[must_use]
    pub fn embed_batch_size(mut self, value: usize) -> Self {
        self.embed_batch_size = value;
        self
    }

    #[must_use]
    pub fn sources_file(mut self, value: impl Into<String>) -> Self {
        self.sources_file = value.into();
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.cache_dir = value.into();
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_tokens == 0 {
            return Err(PipelineError::Config("max_tokens must be positive".into()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(PipelineError::Config(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        if self.min_tokens > self.max_tokens {
            return Err(PipelineError::Config(format!(
                "min_tokens ({}) must not exceed max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(PipelineError::Config(
                "embed_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The subset of settings that affects pipeline output, used as the
    /// settings-scope cache fingerprint. Field order is irrelevant: the cache
    /// serializes this through `serde_json`, whose object keys are sorted.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            min_tokens: self.min_tokens,
            embed_model: self.embed_model.clone(),
            embed_batch_size: self.embed_batch_size,
            sources_file: self.sources_file.clone(),
        }
    }
}

/// Cache-relevant settings; see [`PipelineConfig::cache_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub min_tokens: usize,
    pub embed_model: String,
    pub embed_batch_size: usize,
    pub sources_file: String,
}

fn env_usize(key: &str) -> Result<Option<usize>, PipelineError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|err| PipelineError::Config(format!("failed to parse {key}='{raw}': {err}"))),
        Err(_) => Ok(None),
    }
}
