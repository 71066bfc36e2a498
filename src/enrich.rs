//! Chunk enrichment: stable identifiers, dedup hashes, URL canonicalization,
//! language, content features, and retrieval weights.

use std::collections::HashSet;
use std::hash::Hasher;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHasher;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

use crate::assembly::ChunkDraft;
use crate::quality::detect_language;
use crate::types::{
    Chunk, ChunkEmbedding, ContentFeatures, NearDuplicateHash, PipelineError, SectionKind, Source,
};

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").unwrap());
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```").unwrap());
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*\|.*\|\s*$").unwrap());
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+\S").unwrap());
static OUTBOUND_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"]+"#).unwrap());

/// Title keywords that boost retrieval weight, with their multipliers.
static TITLE_BOOSTS: &[(&[&str], f32)] = &[
    (&["faq", "frequently asked", "q&a", "questions"], 1.3),
    (&["overview", "introduction", "summary"], 1.2),
    (&["example", "tutorial", "how to"], 1.15),
];

/// Derives final [`Chunk`]s from assembly drafts.
#[derive(Debug, Clone, Default)]
pub struct ChunkEnricher;

impl ChunkEnricher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Enriches a document's drafts in order: canonicalizes the source URL,
    /// drops exact duplicates, then assigns contiguous indices, ids, hashes,
    /// and weights. `total_chunks` is the retained count.
    pub fn enrich(
        &self,
        drafts: Vec<ChunkDraft>,
        source: &Source,
    ) -> Result<Vec<Chunk>, PipelineError> {
        let canonical_url = canonicalize_url(&source.url)?;
        let doc_id = doc_id(&canonical_url);

        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut retained: Vec<(ChunkDraft, String)> = Vec::new();
        for draft in drafts {
            let content_hash = sha1_hex(&draft.text);
            if !seen_hashes.insert(content_hash.clone()) {
                debug!(doc_id = %doc_id, "dropping exact-duplicate chunk");
                continue;
            }
            retained.push((draft, content_hash));
        }

        let total = retained.len();
        let mut chunks = Vec::with_capacity(total);
        for (index, (draft, content_hash)) in retained.into_iter().enumerate() {
            let language = source
                .language_hint
                .as_deref()
                .map(|hint| hint.chars().take(2).collect::<String>().to_lowercase())
                .or_else(|| detect_language(&draft.text).map(str::to_string))
                .unwrap_or_else(|| "en".to_string());

            let title = draft.title_path.join(" > ");
            let retrieval_weight =
                retrieval_weight(&draft.text, &title, draft.section_kind);
            let low_signal_reason = if draft.is_low_signal {
                low_signal_reason(&draft.text).to_string()
            } else {
                draft.low_signal_reason.clone()
            };

            chunks.push(Chunk {
                id: chunk_id(&doc_id, index, &content_hash),
                doc_id: doc_id.clone(),
                text: draft.text.clone(),
                source_url: source.url.clone(),
                canonical_url: canonical_url.clone(),
                title_path: draft.title_path,
                chunk_index: index,
                total_chunks: total,
                token_count: draft.token_count,
                near_duplicate_hash: simhash(&draft.text),
                content_hash,
                quality_score: draft.quality_score,
                is_low_signal: draft.is_low_signal,
                low_signal_reason,
                retrieval_weight,
                language,
                section_kind: draft.section_kind,
                features: detect_content_features(&draft.text),
                tags: source.tags.clone(),
                embedding: ChunkEmbedding::Pending,
            });
        }
        Ok(chunks)
    }
}

/// Normalizes a URL to its canonical identity form: lowercase scheme/host,
/// no fragment, no trailing slash (bare path becomes `/`), sorted query
/// parameters, default ports stripped.
pub fn canonicalize_url(raw: &str) -> Result<String, PipelineError> {
    let mut url = Url::parse(raw).map_err(|err| PipelineError::Url {
        url: raw.to_string(),
        message: err.to_string(),
    })?;

    url.set_fragment(None);

    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(if trimmed.is_empty() { "/" } else { trimmed.as_str() });

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    // The url crate already lowercases scheme/host and omits default ports.
    Ok(url.to_string())
}

/// Stable document id: `doc_` plus the first 6 hex chars of the SHA-256 of
/// the canonical URL.
pub fn doc_id(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    format!("doc_{}", &hex::encode(digest)[..6])
}

/// Stable chunk id reproducible from `(doc_id, index, text)` alone.
pub fn chunk_id(doc_id: &str, index: usize, content_hash: &str) -> String {
    format!("{doc_id}#{index:05}-{}", &content_hash[..8])
}

/// SHA-1 over the UTF-8 bytes of the chunk text; exact-duplicate key.
pub fn sha1_hex(text: &str) -> String {
    hex::encode(Sha1::digest(text.as_bytes()))
}

/// 64-bit simhash over word features for near-duplicate detection.
///
/// Texts with fewer than three words cannot vote meaningfully; they fall
/// back to a whole-text hash and are marked degraded.
pub fn simhash(text: &str) -> NearDuplicateHash {
    let words: Vec<&str> = text.unicode_words().collect();
    if words.len() < 3 {
        let mut hasher = FxHasher::default();
        hasher.write(text.as_bytes());
        return NearDuplicateHash {
            value: hasher.finish(),
            degraded: true,
        };
    }

    let mut votes = [0i32; 64];
    for word in &words {
        let mut hasher = FxHasher::default();
        hasher.write(word.to_lowercase().as_bytes());
        let feature = hasher.finish();
        for (bit, vote) in votes.iter_mut().enumerate() {
            if feature >> bit & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    let mut value = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            value |= 1 << bit;
        }
    }
    NearDuplicateHash {
        value,
        degraded: false,
    }
}

/// Retrieval weight in `[0.0, 1.5]`: title keywords boost, boilerplate and
/// very short chunks reduce, structure-aware assembly gets a small bonus.
pub fn retrieval_weight(text: &str, title: &str, section_kind: SectionKind) -> f32 {
    let mut weight = 1.0f32;
    let title_lower = title.to_lowercase();
    let text_lower = text.to_lowercase();

    for (keywords, boost) in TITLE_BOOSTS {
        if keywords.iter().any(|kw| title_lower.contains(kw)) {
            weight *= boost;
            break;
        }
    }

    if ["copyright", "all rights reserved", "terms of service"]
        .iter()
        .any(|kw| text_lower.contains(kw))
    {
        weight *= 0.5;
    } else if text_lower.starts_with("table of contents") || text_lower.starts_with("index") {
        weight *= 0.4;
    }

    if text.len() < 100 {
        weight *= 0.7;
    }

    if section_kind == SectionKind::Structured {
        weight *= 1.1;
    }

    weight.clamp(0.0, 1.5)
}

/// First-match-wins reason taxonomy for chunks already flagged low-signal.
pub fn low_signal_reason(text: &str) -> &'static str {
    let lower = text.to_lowercase();

    let nav = ["navigation", "menu", "breadcrumb", "skip to content"];
    if nav.iter().any(|p| lower.contains(p)) {
        return "nav";
    }

    let footer = [
        "copyright",
        "all rights reserved",
        "privacy policy",
        "terms of use",
    ];
    if footer.iter().filter(|p| lower.contains(*p)).count() >= 2 {
        return "footer";
    }

    let legal = [
        "disclaimer",
        "limitation of liability",
        "indemnification",
        "governing law",
    ];
    if legal.iter().filter(|p| lower.contains(*p)).count() >= 2 {
        return "legal";
    }

    if lower.starts_with("table of contents") || lower.starts_with("contents") {
        return "toc";
    }

    let ads = ["sponsored", "advertisement", "promoted content", "affiliate"];
    if ads.iter().any(|p| lower.contains(p)) {
        return "ads";
    }

    if text.len() < 50 {
        return "too_short";
    }

    if text.chars().all(|c| !c.is_alphabetic()) {
        return "non_text";
    }

    "low_quality"
}

/// Structural features used by downstream ranking.
pub fn detect_content_features(text: &str) -> ContentFeatures {
    let mut headings: Vec<String> = MARKDOWN_HEADING
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect();
    headings.dedup();
    headings.truncate(10);

    ContentFeatures {
        headings,
        has_code: CODE_BLOCK.is_match(text),
        has_table: TABLE_ROW.is_match(text),
        has_list: LIST_ITEM.is_match(text),
        links_out: OUTBOUND_LINK.find_iter(text).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use std::collections::BTreeMap;

    fn draft(text: &str) -> ChunkDraft {
        ChunkDraft {
            text: text.to_string(),
            title_path: vec!["Page".to_string()],
            token_count: 50,
            quality_score: 1.0,
            is_low_signal: false,
            low_signal_reason: String::new(),
            section_kind: SectionKind::Structured,
        }
    }

    fn source(url: &str) -> Source {
        Source {
            id: "s1".to_string(),
            url: url.to_string(),
            title: "Page".to_string(),
            tags: BTreeMap::new(),
            content_kind: ContentKind::Html,
            language_hint: Some("en".to_string()),
        }
    }

    #[test]
    fn canonicalization_ignores_fragment_slash_order_and_port() {
        let a = canonicalize_url("https://EX.org:443/a/?b=2&a=1#frag").unwrap();
        let b = canonicalize_url("https://ex.org/a?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_path_canonicalizes_to_root() {
        let url = canonicalize_url("https://example.com").unwrap();
        assert!(url.ends_with("example.com/"));
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let enricher = ChunkEnricher::new();
        let chunks_a = enricher
            .enrich(vec![draft("same text here")], &source("https://example.com/x"))
            .unwrap();
        let chunks_b = enricher
            .enrich(vec![draft("same text here")], &source("https://example.com/x"))
            .unwrap();
        assert_eq!(chunks_a[0].id, chunks_b[0].id);
        assert!(chunks_a[0].id.starts_with(&chunks_a[0].doc_id));
        assert!(chunks_a[0].id.contains("#00000-"));
    }

    #[test]
    fn identical_text_under_different_urls_shares_content_hash_only() {
        let enricher = ChunkEnricher::new();
        let a = enricher
            .enrich(vec![draft("identical body")], &source("https://one.example/a"))
            .unwrap();
        let b = enricher
            .enrich(vec![draft("identical body")], &source("https://two.example/b"))
            .unwrap();
        assert_eq!(a[0].content_hash, b[0].content_hash);
        assert_ne!(a[0].doc_id, b[0].doc_id);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn exact_duplicates_within_a_document_are_dropped_and_reindexed() {
        let enricher = ChunkEnricher::new();
        let chunks = enricher
            .enrich(
                vec![draft("first"), draft("first"), draft("second")],
                &source("https://example.com/doc"),
            )
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert!(chunks.iter().all(|c| c.total_chunks == 2));
    }

    #[test]
    fn simhash_is_robust_to_small_edits() {
        let base = "the quick brown fox jumps over the lazy dog near the river bank today";
        let edited = "the quick brown fox jumps over the lazy dog near the river bank tonight";
        let a = simhash(base);
        let b = simhash(edited);
        assert!(!a.degraded);
        let distance = (a.value ^ b.value).count_ones();
        assert!(distance <= 16, "hamming distance {distance} too large");
    }

    #[test]
    fn tiny_text_gets_degraded_fingerprint() {
        assert!(simhash("ok").degraded);
    }

    #[test]
    fn title_keywords_boost_weight() {
        let base = retrieval_weight("plain body text that is long enough to avoid the short-chunk penalty being applied here", "Deep Dive", SectionKind::Structured);
        let boosted = retrieval_weight("plain body text that is long enough to avoid the short-chunk penalty being applied here", "Overview", SectionKind::Structured);
        assert!(boosted > base);
    }

    #[test]
    fn boilerplate_reduces_weight() {
        let text = "Copyright 2024 Example Corp. All rights reserved. This page and its content are protected.";
        let weight = retrieval_weight(text, "Footer", SectionKind::Structured);
        assert!(weight < 1.0);
    }

    #[test]
    fn weight_is_clamped_to_upper_bound() {
        let long_text = "useful explanatory content ".repeat(10);
        let weight = retrieval_weight(&long_text, "FAQ Overview Examples", SectionKind::Structured);
        assert!(weight <= 1.5);
    }

    #[test]
    fn low_signal_reasons_follow_priority_order() {
        assert_eq!(low_signal_reason("Skip to content | Menu | Home"), "nav");
        assert_eq!(
            low_signal_reason("Copyright 2024. All rights reserved."),
            "footer"
        );
        assert_eq!(
            low_signal_reason("Table of contents for the entire manual follows below."),
            "toc"
        );
        assert_eq!(
            low_signal_reason("Sponsored content from our partners follows here."),
            "ads"
        );
        assert_eq!(low_signal_reason("tiny"), "too_short");
    }

    #[test]
    fn content_features_detect_structure() {
        let text = "# Title\n\nSome prose.\n\n- item one\n- item two\n\n```\ncode();\n```\n\n| a | b |\n\nSee https://example.com/more.";
        let features = detect_content_features(text);
        assert_eq!(features.headings, vec!["Title"]);
        assert!(features.has_code);
        assert!(features.has_table);
        assert!(features.has_list);
        assert_eq!(features.links_out, 1);
    }
}
