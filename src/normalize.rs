//! Text normalization and document-level low-signal detection.
//!
//! [`TextNormalizer`] is a pure transformation: Unicode NFC, ligature and
//! typographic-punctuation replacement, whitespace collapsing, PDF page
//! chrome stripping, bullet and horizontal-rule cleanup, and sentence
//! boundary polishing. It cannot fail; empty input yields empty output.
//!
//! Low-signal detection runs as an ordered battery of named rules with
//! first-match-wins semantics, so a document's reason code is deterministic
//! and each rule is testable in isolation.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::types::{ContentKind, PipelineError};

// ── Normalization output ───────────────────────────────────────────────

/// Result of normalizing one document.
#[derive(Debug, Clone)]
pub struct NormalizedText {
    pub text: String,
    /// First low-signal rule that tripped, if any.
    pub low_signal_reason: Option<&'static str>,
    pub line_count: usize,
}

impl NormalizedText {
    pub fn is_low_signal(&self) -> bool {
        self.low_signal_reason.is_some()
    }
}

// ── Regex batteries ────────────────────────────────────────────────────

/// Page chrome that repeats on every page of PDF extractions.
const DEFAULT_HEADER_FOOTER_PATTERNS: &[&str] = &[
    r"(?i)^Page \d+ of \d+$",
    r"^\d{1,4}$",
    r"(?i)^Copyright ©?.*\d{4}.*$",
    r"(?i)^©.*(rights reserved|inc\.|ltd\.|llc).*$",
    r"(?i)^All rights reserved\.?$",
    r"(?i)^Table of Contents$",
    r"(?i)^Contents$",
    r"^v?\d+\.\d+(\.\d+)?$",
];

static LIGATURES: &[(&str, &str)] = &[
    ("\u{fb01}", "fi"),
    ("\u{fb00}", "ff"),
    ("\u{fb02}", "fl"),
    ("\u{fb03}", "ffi"),
    ("\u{fb04}", "ffl"),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("\u{2013}", "-"),
    ("\u{2014}", "-"),
];

static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static LINE_EDGE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" *\n *").unwrap());
static EXCESS_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static BULLET_SYMBOLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[•·◦▪▫■□◆◇※→➤➢‣⁃]\s*").unwrap());
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[-=_*]{3,}\s*$").unwrap());
static SENTENCE_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.([A-Z])").unwrap());
static EG_ABBREV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\be\.g\.,?\s*").unwrap());
static IE_ABBREV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bi\.e\.,?\s*").unwrap());

static URL_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://").unwrap());
static TOC_LEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:\.\s*){3,}\d+").unwrap());
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?](\s|$)").unwrap());

// ── Low-signal rule battery ────────────────────────────────────────────

/// A named low-signal predicate evaluated over the normalized document.
struct SignalRule {
    reason: &'static str,
    check: fn(&DocumentStats) -> bool,
}

/// Pre-computed statistics the rules vote on.
struct DocumentStats<'a> {
    text: &'a str,
    words: usize,
    sentences: usize,
    urls: usize,
    lines: Vec<&'a str>,
}

impl<'a> DocumentStats<'a> {
    fn gather(text: &'a str) -> Self {
        Self {
            text,
            words: text.unicode_words().count(),
            sentences: SENTENCE_END.find_iter(text).count(),
            urls: URL_MATCHER.find_iter(text).count(),
            lines: text.lines().filter(|line| !line.trim().is_empty()).collect(),
        }
    }
}

/// Priority-ordered battery; the first rule that trips names the reason.
const SIGNAL_RULES: &[SignalRule] = &[
    SignalRule {
        reason: "too_few_words",
        check: |stats| stats.words < 20,
    },
    SignalRule {
        reason: "too_few_sentences",
        check: |stats| stats.sentences < 2,
    },
    SignalRule {
        reason: "short_sentences",
        check: |stats| stats.sentences > 0 && stats.words / stats.sentences < 4,
    },
    SignalRule {
        reason: "url_dense",
        check: |stats| stats.urls > 5 && stats.urls * 50 > stats.text.len(),
    },
    SignalRule {
        reason: "toc",
        check: |stats| TOC_LEADER.is_match(stats.text),
    },
    SignalRule {
        reason: "nav_dense",
        check: |stats| {
            let short = stats.lines.iter().filter(|line| line.len() < 30).count();
            stats.lines.len() >= 10 && short * 10 > stats.lines.len() * 7
        },
    },
    SignalRule {
        reason: "symbol_dense",
        check: |stats| {
            // Code fences legitimately carry heavy punctuation.
            if stats.text.contains("```") {
                return false;
            }
            let total = stats.text.chars().count();
            if total == 0 {
                return false;
            }
            let special = stats
                .text
                .chars()
                .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
                .count();
            special * 10 > total * 4
        },
    },
    SignalRule {
        reason: "boilerplate",
        check: |stats| {
            let lower = stats.text.to_lowercase();
            let keywords = [
                "copyright",
                "all rights reserved",
                "privacy policy",
                "terms of use",
                "terms of service",
                "disclaimer",
            ];
            keywords.iter().filter(|kw| lower.contains(*kw)).count() >= 2
        },
    },
];

/// Evaluates the rule battery; returns the first tripped rule's reason.
pub fn detect_low_signal(text: &str) -> Option<&'static str> {
    let stats = DocumentStats::gather(text);
    SIGNAL_RULES
        .iter()
        .find(|rule| (rule.check)(&stats))
        .map(|rule| rule.reason)
}

// ── TextNormalizer ─────────────────────────────────────────────────────

/// Cleans raw extracted text ahead of structure parsing.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    header_footer: Vec<Regex>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        let header_footer = DEFAULT_HEADER_FOOTER_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("builtin header/footer pattern"))
            .collect();
        Self { header_footer }
    }
}

impl TextNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the header/footer battery with caller-supplied patterns.
    pub fn with_header_footer_patterns(patterns: &[&str]) -> Result<Self, PipelineError> {
        let header_footer = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    PipelineError::Config(format!("invalid header/footer pattern '{pattern}': {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { header_footer })
    }

    /// Full cleaning pass. Pure; always succeeds.
    pub fn normalize(&self, raw: &str, kind: ContentKind) -> NormalizedText {
        if raw.trim().is_empty() {
            return NormalizedText {
                text: String::new(),
                low_signal_reason: Some("too_few_words"),
                line_count: 0,
            };
        }

        let mut text = normalize_characters(raw);
        text = collapse_whitespace(&text);

        // PDFs repeat page chrome on every extracted page; HTML rarely does.
        if kind == ContentKind::Pdf {
            text = self.strip_header_footer(&text);
        }

        text = BULLET_SYMBOLS.replace_all(&text, "- ").into_owned();
        text = HORIZONTAL_RULE.replace_all(&text, "").into_owned();
        text = polish_sentences(&text);
        text = collapse_whitespace(&text);

        let low_signal_reason = detect_low_signal(&text);
        let line_count = text.lines().count();
        NormalizedText {
            text,
            low_signal_reason,
            line_count,
        }
    }

    fn strip_header_footer(&self, text: &str) -> String {
        let kept: Vec<&str> = text
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !self
                    .header_footer
                    .iter()
                    .any(|pattern| pattern.is_match(trimmed))
            })
            .collect();
        kept.join("\n")
    }
}

fn normalize_characters(text: &str) -> String {
    let mut out: String = text.nfc().collect();
    for (from, to) in LIGATURES {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let text = HORIZONTAL_WS.replace_all(text, " ");
    let text = LINE_EDGE_WS.replace_all(&text, "\n");
    let text = EXCESS_BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn polish_sentences(text: &str) -> String {
    let text = SENTENCE_GAP.replace_all(text, ". $1");
    let text = EG_ABBREV.replace_all(&text, "e.g., ");
    let text = IE_ABBREV.replace_all(&text, "i.e., ");
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::new()
    }

    #[test]
    fn replaces_ligatures_and_typographic_punctuation() {
        let out = normalizer().normalize(
            "The \u{fb01}le uses \u{201c}curly\u{201d} quotes \u{2014} and dashes. \
             It also has enough words and sentences to stay above the floors. \
             A second sentence keeps the battery quiet here.",
            ContentKind::Text,
        );
        assert!(out.text.contains("file"));
        assert!(out.text.contains("\"curly\""));
        assert!(out.text.contains("- and dashes"));
    }

    #[test]
    fn caps_blank_line_runs_at_one() {
        let out = normalizer().normalize("alpha\n\n\n\n\nbeta", ContentKind::Text);
        assert_eq!(out.text, "alpha\n\nbeta");
    }

    #[test]
    fn strips_pdf_page_chrome_only_for_pdfs() {
        let raw = "Useful paragraph text goes here.\nPage 3 of 10\nMore useful text.";
        let pdf = normalizer().normalize(raw, ContentKind::Pdf);
        assert!(!pdf.text.contains("Page 3 of 10"));
        let html = normalizer().normalize(raw, ContentKind::Html);
        assert!(html.text.contains("Page 3 of 10"));
    }

    #[test]
    fn empty_input_is_low_signal_not_an_error() {
        let out = normalizer().normalize("   \n\t ", ContentKind::Html);
        assert!(out.text.is_empty());
        assert_eq!(out.low_signal_reason, Some("too_few_words"));
    }

    #[test]
    fn toc_leaders_trip_the_toc_rule() {
        // Enough words/sentences that earlier rules stay quiet.
        let text = "Introduction to the system design and all of its many parts. \
                    The chapters are listed with their page numbers below here. \
                    Third sentence for good measure and sufficient length. \
                    Chapter One . . . . 42";
        assert_eq!(detect_low_signal(text), Some("toc"));
    }

    #[test]
    fn short_documents_trip_the_word_floor_first() {
        assert_eq!(detect_low_signal("just a few words"), Some("too_few_words"));
    }

    #[test]
    fn nav_heavy_documents_are_flagged() {
        let nav = (0..12)
            .map(|i| format!("Go to the home page {i} now."))
            .collect::<Vec<_>>()
            .join("\n");
        // Plenty of words and sentence enders, but every line is short.
        assert_eq!(detect_low_signal(&nav), Some("nav_dense"));
    }

    #[test]
    fn code_fences_exempt_symbol_density() {
        let code = "```\nfn main() { println!(\"{:?}\", (1, 2, 3)); }\n```\n"
            .repeat(4)
            + "This paragraph explains what the snippet above actually does in practice. \
               It runs the program and prints a tuple to standard output for the reader. \
               That is all there is to say about the behavior shown.";
        assert_eq!(detect_low_signal(&code), None);
    }

    #[test]
    fn prose_passes_the_battery() {
        let prose = "Reliable systems are built from well-understood parts that fail in \
                     predictable ways. When a dependency misbehaves, the caller should \
                     degrade gracefully rather than crash. This chapter walks through \
                     the patterns teams use to keep services healthy under pressure.";
        assert_eq!(detect_low_signal(prose), None);
    }
}
