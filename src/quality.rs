//! Chunk-level quality scoring.
//!
//! The scorer starts every chunk at 1.0 and applies multiplicative penalties
//! for boilerplate signals; crossing the harder thresholds also flags the
//! chunk low-signal, which drops it from the retained output. Patterns are
//! kept as a named table so individual rules stay testable.

use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

/// Lines that carry no retrieval value on their own.
static LOW_VALUE_LINES: &[(&str, &str)] = &[
    ("link_only", r"^\s*\[[^\]]*\]\([^)]*\)\s*$"),
    ("bare_number", r"^\s*\d+\.?\s*$"),
    ("bare_bullet", r"^\s*-\s*$"),
    ("advertisement", r"(?i)^\s*(Advertisement|Sponsored|Ad)\s*$"),
    ("read_more", r"(?i)^\s*(Read more|Continue reading|Click here)\s*$"),
    ("page_marker", r"(?i)^\s*Page \d+ of \d+\s*$"),
    ("copyright", r"(?i)^\s*Copyright ©?.*$"),
    ("rights_reserved", r"(?i)^\s*All rights reserved\.?\s*$"),
];

static LOW_VALUE_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    LOW_VALUE_LINES
        .iter()
        .map(|(_, pattern)| Regex::new(pattern).expect("builtin low-value pattern"))
        .collect()
});

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\([^)]*\)").unwrap());

/// Headings whose sections hold link lists and reference matter rather than
/// retrievable prose.
static LOW_SIGNAL_HEADINGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(related(\s+(documents|links|articles|topics))?|resources|references|see\s+also|further\s+reading|external\s+links|bibliography)$",
    )
    .unwrap()
});

/// True for headings like "See Also" or "References"; the assembler skips
/// the sections beneath them.
pub fn is_low_signal_heading(heading: &str) -> bool {
    LOW_SIGNAL_HEADINGS.is_match(heading.trim())
}

const PUNCTUATION: &str = ".,;:!?()[]{}/<>@#$%^&*+=|\\`~\"'";

/// Outcome of assessing one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    /// Final score clamped into `[0.0, 1.0]`.
    pub score: f32,
    pub is_low_signal: bool,
    /// First penalty that forced the low-signal flag, if any.
    pub reason: Option<&'static str>,
}

/// Scores a chunk's text against the boilerplate battery.
///
/// `expected_language` enables the soft language-mismatch penalty; pass
/// `None` to skip it.
pub fn assess(
    text: &str,
    token_count: usize,
    min_tokens: usize,
    expected_language: Option<&str>,
) -> QualityAssessment {
    let mut score = 1.0f32;
    let mut is_low_signal = false;
    let mut reason = None;

    // Token floor short-circuits: a fragment this small is never retained.
    if token_count < min_tokens {
        return QualityAssessment {
            score: (score * 0.3).clamp(0.0, 1.0),
            is_low_signal: true,
            reason: Some("below_token_floor"),
        };
    }

    let lines: Vec<&str> = text.lines().collect();
    if !lines.is_empty() {
        let low_value = lines
            .iter()
            .filter(|line| LOW_VALUE_MATCHERS.iter().any(|m| m.is_match(line)))
            .count();
        if low_value * 2 > lines.len() {
            score *= 0.4;
            is_low_signal = true;
            reason.get_or_insert("low_value_lines");
        }
    }

    let total_chars = text.chars().count();
    if total_chars > 0 {
        let punct = text.chars().filter(|c| PUNCTUATION.contains(*c)).count();
        let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
        let punct_ratio = punct as f32 / total_chars as f32;
        let digit_ratio = digits as f32 / total_chars as f32;

        if punct_ratio > 0.3 {
            score *= 0.6;
            if punct_ratio > 0.5 {
                is_low_signal = true;
                reason.get_or_insert("punctuation_heavy");
            }
        }
        if digit_ratio > 0.3 {
            score *= 0.6;
            if digit_ratio > 0.5 {
                is_low_signal = true;
                reason.get_or_insert("digit_heavy");
            }
        }
    }

    if MARKDOWN_LINK.is_match(text) {
        let residual = MARKDOWN_LINK.replace_all(text, "");
        if residual.trim().len() < 50 {
            score *= 0.3;
            is_low_signal = true;
            reason.get_or_insert("link_farm");
        }
    }

    if let Some(expected) = expected_language {
        if let Some(detected) = detect_language(text) {
            let expected_code: String = expected.chars().take(2).collect();
            // Soft signal only; mismatches lower ranking but stay retained.
            if detected != expected_code.to_lowercase() {
                score *= 0.7;
            }
        }
    }

    QualityAssessment {
        score: score.clamp(0.0, 1.0),
        is_low_signal,
        reason,
    }
}

// ── Language detection ─────────────────────────────────────────────────

/// Stopword profiles for the languages the corpus actually contains.
/// Deliberately small: the detector only feeds a soft ranking penalty.
static STOPWORD_PROFILES: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "of", "to", "in", "is", "that", "for", "with", "are",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "mit", "für", "auf", "ein",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "pour", "dans", "une", "des", "que",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "es", "para", "una", "del", "que", "con",
        ],
    ),
];

/// Guesses a two-letter language code from stopword frequency.
///
/// Returns `None` when no profile reaches three hits, which keeps short or
/// codey chunks from producing spurious mismatch penalties.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let sample: Vec<String> = text
        .unicode_words()
        .take(200)
        .map(str::to_lowercase)
        .collect();

    let mut best: Option<(&'static str, usize)> = None;
    for (code, stopwords) in STOPWORD_PROFILES {
        let hits = sample
            .iter()
            .filter(|word| stopwords.contains(&word.as_str()))
            .count();
        if hits >= 3 && best.map_or(true, |(_, top)| hits > top) {
            best = Some((code, hits));
        }
    }
    best.map(|(code, _)| code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_floor_short_circuits() {
        let out = assess("tiny", 3, 40, None);
        assert!(out.is_low_signal);
        assert_eq!(out.reason, Some("below_token_floor"));
        assert!((out.score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn low_value_lines_penalize_and_flag() {
        let text = "Advertisement\nRead more\nPage 1 of 9\none real line of text here";
        let out = assess(text, 100, 40, None);
        assert!(out.is_low_signal);
        assert_eq!(out.reason, Some("low_value_lines"));
        assert!(out.score < 0.5);
    }

    #[test]
    fn link_farms_are_flagged() {
        let text = "[a](https://a.example)\n[b](https://b.example)\n[c](https://c.example)\nok";
        let out = assess(text, 100, 40, None);
        assert!(out.is_low_signal);
        // Link-only lines also trip the low-value-line rule first.
        assert!(out.score < 0.2);
    }

    #[test]
    fn digit_heavy_tables_lose_score() {
        let digits = "1234567890 ".repeat(30);
        let out = assess(&digits, 100, 40, None);
        assert!(out.score < 1.0);
        assert!(out.is_low_signal);
    }

    #[test]
    fn clean_prose_keeps_full_score() {
        let prose = "Retrieval systems work best when each chunk reads as a coherent \
                     passage. The assembler therefore packs whole sections together \
                     and only splits when the token budget forces it to.";
        let out = assess(prose, 100, 40, Some("en"));
        assert!(!out.is_low_signal);
        assert!((out.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn language_mismatch_is_a_soft_penalty() {
        let german = "Der Hund und die Katze sind nicht im Haus, und das ist für \
                      alle ein Problem. Die Tiere sind mit dem Nachbarn auf ein \
                      Feld gegangen und das war nicht geplant.";
        let out = assess(german, 100, 40, Some("en"));
        assert!(!out.is_low_signal);
        assert!((out.score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn reference_headings_match_the_battery() {
        assert!(is_low_signal_heading("See Also"));
        assert!(is_low_signal_heading("related documents"));
        assert!(is_low_signal_heading("Further Reading"));
        assert!(!is_low_signal_heading("Related Work in Depth"));
        assert!(!is_low_signal_heading("Usage"));
    }

    #[test]
    fn detects_english_prose() {
        let english = "The cache is read fully into memory and flushed to disk after \
                       each mutating operation so that the state survives restarts.";
        assert_eq!(detect_language(english), Some("en"));
    }

    #[test]
    fn short_fragments_detect_nothing() {
        assert_eq!(detect_language("42"), None);
    }
}
