//! Token-budgeted chunk assembly with lookback overlap.
//!
//! Sections are packed in order until the budget would overflow, the buffer
//! is finalized into a chunk, and the next buffer is seeded with a trailing
//! window of the previous one so adjacent chunks share context. Documents
//! with no usable structure fall back to plain token windows.

use tracing::debug;

use crate::config::PipelineConfig;
use crate::quality::{self, QualityAssessment};
use crate::structure::{MAX_HEADING_DEPTH, Section};
use crate::tokenizer::Tokenizer;
use crate::types::{PipelineError, SectionKind};

/// A chunk before enrichment: no ids, hashes, or final indices yet.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub text: String,
    /// Page title plus up to three ancestor headings, in order.
    pub title_path: Vec<String>,
    pub token_count: usize,
    pub quality_score: f32,
    pub is_low_signal: bool,
    pub low_signal_reason: String,
    pub section_kind: SectionKind,
}

/// Packs parsed sections into token-budgeted chunks.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    max_tokens: usize,
    overlap_tokens: usize,
    min_tokens: usize,
    tokenizer: Tokenizer,
}

impl ChunkAssembler {
    pub fn new(config: &PipelineConfig, tokenizer: Tokenizer) -> Self {
        Self {
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
            min_tokens: config.min_tokens,
            tokenizer,
        }
    }

    /// Structure-aware assembly. Low-signal chunks are scored for
    /// diagnostics but never returned.
    pub fn assemble(
        &self,
        sections: &[Section],
        page_title: &str,
        language: &str,
    ) -> Vec<ChunkDraft> {
        let mut drafts: Vec<ChunkDraft> = Vec::new();
        let mut buffer: Vec<Section> = Vec::new();
        let mut running_tokens = 0usize;
        let mut heading_path: Vec<String> = Vec::new();
        // Heading level of an active reference-section skip, if any.
        let mut skipping: Option<usize> = None;

        for section in sections {
            if section.content.is_empty() && section.heading.is_empty() {
                continue;
            }

            if section.is_heading() {
                if skipping.is_some_and(|level| section.level <= level) {
                    skipping = None;
                }
                heading_path = section.parent_headings.clone();
                heading_path.push(section.heading.clone());
                if skipping.is_none() && quality::is_low_signal_heading(&section.heading) {
                    debug!(heading = %section.heading, "skipping reference section");
                    skipping = Some(section.level);
                }
            }
            if skipping.is_some() {
                continue;
            }

            let section_tokens = self.tokenizer.count(&section.render());

            if running_tokens + section_tokens > self.max_tokens && !buffer.is_empty() {
                self.finalize(&buffer, page_title, &heading_path, language, &mut drafts);
                buffer = self.overlap_window(&buffer);
                running_tokens = buffer
                    .iter()
                    .map(|s| self.tokenizer.count(&s.render()))
                    .sum();
            }

            buffer.push(section.clone());
            running_tokens += section_tokens;
        }

        if !buffer.is_empty() {
            self.finalize(&buffer, page_title, &heading_path, language, &mut drafts);
        }

        drafts
    }

    fn finalize(
        &self,
        buffer: &[Section],
        page_title: &str,
        heading_path: &[String],
        language: &str,
        drafts: &mut Vec<ChunkDraft>,
    ) {
        let text = buffer
            .iter()
            .map(Section::render)
            .filter(|rendered| !rendered.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string();
        if text.is_empty() {
            return;
        }

        let token_count = self.tokenizer.count(&text);
        let mut title_path = Vec::with_capacity(1 + MAX_HEADING_DEPTH);
        if !page_title.is_empty() {
            title_path.push(page_title.to_string());
        }
        title_path.extend(heading_path.iter().take(MAX_HEADING_DEPTH).cloned());

        let QualityAssessment {
            score,
            is_low_signal,
            reason,
        } = quality::assess(&text, token_count, self.min_tokens, Some(language));

        if is_low_signal {
            debug!(
                reason = reason.unwrap_or(""),
                tokens = token_count,
                "dropping low-signal chunk"
            );
            return;
        }

        drafts.push(ChunkDraft {
            text,
            title_path,
            token_count,
            quality_score: score,
            is_low_signal: false,
            low_signal_reason: String::new(),
            section_kind: SectionKind::Structured,
        });
    }

    /// Trailing sections of a finalized buffer whose combined token count
    /// stays within the overlap budget; seeds the next buffer.
    fn overlap_window(&self, buffer: &[Section]) -> Vec<Section> {
        let mut window: Vec<Section> = Vec::new();
        let mut tokens = 0usize;
        for section in buffer.iter().rev() {
            let section_tokens = self.tokenizer.count(&section.render());
            if tokens + section_tokens > self.overlap_tokens {
                break;
            }
            window.insert(0, section.clone());
            tokens += section_tokens;
        }
        window
    }

    /// Fallback for documents with no parseable structure: fixed-size token
    /// windows with step `max_tokens - overlap_tokens`. Window text is
    /// reconstructed by decoding the token slice, so a slice that lands
    /// inside a multi-byte character surfaces as a tokenizer error and the
    /// document is skipped upstream.
    pub fn window_chunks(
        &self,
        text: &str,
        page_title: &str,
        language: &str,
    ) -> Result<Vec<ChunkDraft>, PipelineError> {
        let tokens = self.tokenizer.encode(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let title_path = if page_title.is_empty() {
            Vec::new()
        } else {
            vec![page_title.to_string()]
        };

        let mut drafts = Vec::new();
        let step = self.max_tokens - self.overlap_tokens;
        let mut start = 0usize;

        while start < tokens.len() {
            let end = (start + self.max_tokens).min(tokens.len());
            let window = &tokens[start..end];
            if window.len() < self.min_tokens {
                break;
            }

            let chunk_text = self.tokenizer.decode(window)?;
            let token_count = window.len();
            let QualityAssessment {
                score,
                is_low_signal,
                reason,
            } = quality::assess(&chunk_text, token_count, self.min_tokens, Some(language));

            if is_low_signal {
                debug!(
                    reason = reason.unwrap_or(""),
                    tokens = token_count,
                    "dropping low-signal window chunk"
                );
            } else {
                drafts.push(ChunkDraft {
                    text: chunk_text,
                    title_path: title_path.clone(),
                    token_count,
                    quality_score: score,
                    is_low_signal: false,
                    low_signal_reason: String::new(),
                    section_kind: SectionKind::Window,
                });
            }

            if end >= tokens.len() {
                break;
            }
            start += step;
        }

        Ok(drafts)
    }
}
