//! Chunksmith turns raw documents into token-budgeted, metadata-rich chunks
//! for retrieval pipelines, with persistent caching of chunk sets and
//! embeddings between runs.
//!
//! ```text
//!            ┌────────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐
//!  raw text ─► normalize   ├──► structure  ├──► assembly  ├──► enrich   ├─► chunks
//!            │ (clean,     │   │ (heading  │   │ (token   │   │ (ids,   │
//!            │  de-noise)  │   │  tree)    │   │  packing)│   │  hashes)│
//!            └────────────┘   └───────────┘   └──────────┘   └────┬────┘
//!                                                                 │
//!                                        ┌────────────┐   ┌───────▼──────┐
//!                                        │ embeddings  ◄───┤ cache        │
//!                                        │ (provider)  │   │ (chunk sets, │
//!                                        └────────────┘   │  vectors)    │
//!                                                          └──────────────┘
//! ```
//!
//! [`pipeline::ChunkingPipeline`] wires the stages together; each stage is
//! also usable on its own.

pub mod assembly;
pub mod cache;
pub mod config;
pub mod embeddings;
pub mod enrich;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod structure;
pub mod tokenizer;
pub mod types;

pub use cache::PipelineCache;
pub use config::{CacheSettings, PipelineConfig};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, NullEmbeddingProvider};
pub use pipeline::{ChunkingPipeline, RunOutcome, RunSummary};
pub use types::{Chunk, ChunkEmbedding, ContentKind, PipelineError, Source, SourceDocument};
