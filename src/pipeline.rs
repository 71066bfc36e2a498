//! End-to-end orchestration: normalize, parse, assemble, enrich, cache,
//! embed.
//!
//! `chunk_document` is the pure per-document path; `run` wraps it with the
//! cache and an embedding provider for whole-corpus ingestion.

use tracing::{debug, info, warn};

use crate::assembly::ChunkAssembler;
use crate::cache::PipelineCache;
use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::enrich::ChunkEnricher;
use crate::normalize::TextNormalizer;
use crate::quality::detect_language;
use crate::structure::StructureParser;
use crate::tokenizer::Tokenizer;
use crate::types::{Chunk, ChunkEmbedding, PipelineError, Source, SourceDocument};

/// What a [`ChunkingPipeline::run`] call did, for logging and callers that
/// surface ingestion progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: usize,
    pub failed_documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub embedded_from_cache: usize,
    pub from_cache: bool,
}

/// Chunks plus the run's bookkeeping.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub chunks: Vec<Chunk>,
    pub summary: RunSummary,
}

/// The full document-to-chunks pipeline.
#[derive(Debug, Clone)]
pub struct ChunkingPipeline {
    config: PipelineConfig,
    normalizer: TextNormalizer,
    parser: StructureParser,
    assembler: ChunkAssembler,
    enricher: ChunkEnricher,
}

impl ChunkingPipeline {
    /// Builds a pipeline whose token counts match `config.embed_model`.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let tokenizer = Tokenizer::for_model(&config.embed_model)?;
        Ok(Self {
            normalizer: TextNormalizer::new(),
            parser: StructureParser::new(),
            assembler: ChunkAssembler::new(&config, tokenizer),
            enricher: ChunkEnricher::new(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Chunks a single document. Deterministic for a given input and config;
    /// returns an empty list when the document carries no retrievable text.
    pub fn chunk_document(&self, document: &SourceDocument) -> Result<Vec<Chunk>, PipelineError> {
        let source = &document.source;
        let normalized = self
            .normalizer
            .normalize(&document.text, source.content_kind);

        if let Some(reason) = normalized.low_signal_reason {
            debug!(source = %source.url, reason, "skipping low-signal document");
            return Ok(Vec::new());
        }

        let language = source
            .language_hint
            .as_deref()
            .map(|hint| hint.chars().take(2).collect::<String>().to_lowercase())
            .or_else(|| detect_language(&normalized.text).map(str::to_string))
            .unwrap_or_else(|| "en".to_string());

        let sections = self.parser.parse(&normalized.text, &source.title);
        let mut drafts = self.assembler.assemble(&sections, &source.title, &language);

        if drafts.is_empty() {
            debug!(source = %source.url, "no structured chunks, trying token windows");
            drafts = self
                .assembler
                .window_chunks(&normalized.text, &source.title, &language)?;
        }

        self.enricher.enrich(drafts, source)
    }

    /// Chunks every document, consulting the cache first and embedding the
    /// result. Documents that fail are skipped with a warning; the run only
    /// errors if no document yields any chunk.
    pub async fn run(
        &self,
        documents: &[SourceDocument],
        cache: &mut PipelineCache,
        provider: &dyn EmbeddingProvider,
    ) -> Result<RunOutcome, PipelineError> {
        let settings = self.config.cache_settings();
        let sources: Vec<Source> = documents.iter().map(|doc| doc.source.clone()).collect();

        let mut summary = RunSummary {
            documents: documents.len(),
            ..RunSummary::default()
        };

        let mut chunks = match cache.get_chunks(&settings, &sources)? {
            Some(cached) => {
                summary.from_cache = true;
                cached
            }
            None => {
                let mut fresh = Vec::new();
                for document in documents {
                    match self.chunk_document(document) {
                        Ok(doc_chunks) => fresh.extend(doc_chunks),
                        Err(err) => {
                            warn!(source = %document.source.url, error = %err, "document failed, skipping");
                            summary.failed_documents += 1;
                        }
                    }
                }
                if fresh.is_empty() {
                    return Err(PipelineError::NoUsableChunks {
                        documents: documents.len(),
                    });
                }
                cache.put_chunks(&settings, &sources, &fresh).await?;
                fresh
            }
        };
        summary.chunks = chunks.len();

        self.embed_pending(&mut chunks, cache, provider, &mut summary)
            .await?;

        info!(
            documents = summary.documents,
            failed = summary.failed_documents,
            chunks = summary.chunks,
            embedded = summary.embedded,
            from_cache = summary.from_cache,
            "pipeline run complete"
        );
        Ok(RunOutcome { chunks, summary })
    }

    /// Fills embeddings from the cache, then asks the provider for the
    /// remainder in config-sized batches. A failed batch leaves its chunks
    /// pending; newly produced vectors are persisted.
    async fn embed_pending(
        &self,
        chunks: &mut [Chunk],
        cache: &mut PipelineCache,
        provider: &dyn EmbeddingProvider,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let model = provider.model();
        let cached = cache.embeddings_for(model, chunks.iter().map(|c| c.id.as_str()));
        for chunk in chunks.iter_mut() {
            if let Some(vector) = cached.get(&chunk.id) {
                chunk.embedding = ChunkEmbedding::Embedded(vector.clone());
                summary.embedded_from_cache += 1;
            }
        }

        let pending: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.embedding == ChunkEmbedding::Pending)
            .map(|(index, _)| index)
            .collect();

        let mut produced: Vec<(String, Vec<f32>)> = Vec::new();
        for batch in pending.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            match provider.embed(&texts).await {
                Ok(slots) => {
                    for (&index, slot) in batch.iter().zip(slots) {
                        if let Some(vector) = slot {
                            produced.push((chunks[index].id.clone(), vector.clone()));
                            chunks[index].embedding = ChunkEmbedding::Embedded(vector);
                        }
                    }
                }
                Err(err) => {
                    warn!(model, batch = batch.len(), error = %err, "embedding batch failed, chunks stay pending");
                }
            }
        }
        if !produced.is_empty() {
            cache.put_embeddings(model, produced).await?;
        }

        summary.embedded = chunks
            .iter()
            .filter(|chunk| matches!(chunk.embedding, ChunkEmbedding::Embedded(_)))
            .count();
        Ok(())
    }
}
