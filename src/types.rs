//! Core data model and error types shared across the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the chunking and caching pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid source url '{url}': {message}")]
    Url { url: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// Every document in the run failed to yield a retained chunk. Individual
    /// document failures are recoverable and tallied in the run summary; this
    /// is the hard-stop case.
    #[error("no usable chunks produced across {documents} document(s)")]
    NoUsableChunks { documents: usize },
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serde(err.to_string())
    }
}

/// Format of the upstream-extracted content, as reported by the fetcher.
///
/// Only the normalizer branches on this (PDF page chrome stripping); the rest
/// of the pipeline is format-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Html,
    Pdf,
    Markdown,
    Docx,
    Text,
}

/// A source document descriptor handed over by the (external) fetcher layer.
///
/// `tags` is pass-through classification metadata; it is copied verbatim onto
/// every chunk derived from the document and never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default)]
    pub language_hint: Option<String>,
}

/// A source paired with its cleaned text, the unit the pipeline consumes.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source: Source,
    pub text: String,
}

impl SourceDocument {
    pub fn new(source: Source, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Embedding state of a chunk.
///
/// Modeled as a sum type so downstream code cannot mistake a missing
/// embedding for a zero vector. On the wire this serializes as a nullable
/// vector for compatibility with the JSONL writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "Option<Vec<f32>>", into = "Option<Vec<f32>>")]
pub enum ChunkEmbedding {
    #[default]
    Pending,
    Embedded(Vec<f32>),
}

impl ChunkEmbedding {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChunkEmbedding::Pending)
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            ChunkEmbedding::Pending => None,
            ChunkEmbedding::Embedded(vec) => Some(vec),
        }
    }
}

impl From<Option<Vec<f32>>> for ChunkEmbedding {
    fn from(value: Option<Vec<f32>>) -> Self {
        match value {
            Some(vec) => ChunkEmbedding::Embedded(vec),
            None => ChunkEmbedding::Pending,
        }
    }
}

impl From<ChunkEmbedding> for Option<Vec<f32>> {
    fn from(value: ChunkEmbedding) -> Self {
        match value {
            ChunkEmbedding::Pending => None,
            ChunkEmbedding::Embedded(vec) => Some(vec),
        }
    }
}

/// Near-duplicate fingerprint with provenance.
///
/// `degraded` marks fingerprints computed over too little text for a
/// meaningful simhash; those fall back to a whole-text hash and should not be
/// compared bit-wise against full fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearDuplicateHash {
    pub value: u64,
    pub degraded: bool,
}

/// How a chunk's boundaries were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Structure-aware assembly from parsed sections.
    Structured,
    /// Plain token-window fallback for unstructured documents.
    Window,
}

/// Structural features detected in a chunk's text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFeatures {
    pub headings: Vec<String>,
    pub has_code: bool,
    pub has_table: bool,
    pub has_list: bool,
    pub links_out: usize,
}

/// The unit of retrieval: a bounded span of document text plus metadata.
///
/// Created by assembly + enrichment, optionally given an embedding later,
/// and never mutated after serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id: `{doc_id}#{chunk_index:05}-{content_hash[..8]}`.
    pub id: String,
    /// Stable hash of the canonicalized source URL, `doc_`-prefixed.
    pub doc_id: String,
    pub text: String,
    pub source_url: String,
    pub canonical_url: String,
    /// Ordered heading strings from page title down to the immediate section.
    pub title_path: Vec<String>,
    pub chunk_index: usize,
    /// Count of retained chunks for this document, back-filled once the
    /// document's full chunk list is known.
    pub total_chunks: usize,
    pub token_count: usize,
    /// SHA-1 over the UTF-8 bytes of `text`; exact-duplicate dedup key.
    pub content_hash: String,
    pub near_duplicate_hash: NearDuplicateHash,
    pub quality_score: f32,
    pub is_low_signal: bool,
    #[serde(default)]
    pub low_signal_reason: String,
    pub retrieval_weight: f32,
    pub language: String,
    pub section_kind: SectionKind,
    #[serde(default)]
    pub features: ContentFeatures,
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: ChunkEmbedding,
}

impl Chunk {
    /// Hierarchical title, e.g. `"Page Title > Section > Subsection"`.
    pub fn hierarchical_title(&self) -> String {
        self.title_path.join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_embedding_serializes_as_nullable_vector() {
        let pending = serde_json::to_value(ChunkEmbedding::Pending).unwrap();
        assert!(pending.is_null());

        let embedded = serde_json::to_value(ChunkEmbedding::Embedded(vec![0.5, 1.0])).unwrap();
        assert_eq!(embedded, serde_json::json!([0.5, 1.0]));

        let back: ChunkEmbedding = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(back.is_pending());
    }

    #[test]
    fn source_deserializes_with_defaults() {
        let source: Source = serde_json::from_str(
            r#"{"id": "s1", "url": "https://example.com", "title": "Example"}"#,
        )
        .unwrap();
        assert_eq!(source.content_kind, ContentKind::Html);
        assert!(source.tags.is_empty());
        assert!(source.language_hint.is_none());
    }
}
