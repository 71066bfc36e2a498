//! Document structure parsing: headings, paragraphs, and hierarchy.

use std::sync::LazyLock;

use regex::Regex;

/// Heading levels `#` through `###` become hierarchy nodes; `####` and
/// deeper are demoted to paragraph content so the hierarchy stays bounded
/// at three levels even for deeply nested markdown.
pub const MAX_HEADING_DEPTH: usize = 3;

static HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

/// A parsed unit of a document.
///
/// `level` 0 is the page title, 1..=3 are headings, 4 is a paragraph.
/// Immutable once created; consumed within a single chunking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub content: String,
    pub level: usize,
    pub heading: String,
    /// Ancestor heading strings in order, excluding this section's own.
    pub parent_headings: Vec<String>,
}

impl Section {
    pub fn is_heading(&self) -> bool {
        self.level >= 1 && self.level <= MAX_HEADING_DEPTH && !self.heading.is_empty()
    }

    pub fn is_paragraph(&self) -> bool {
        self.level > MAX_HEADING_DEPTH
    }

    /// The text this section contributes to a chunk: markdown heading markup
    /// for hierarchy nodes, the body for paragraphs.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if self.is_heading() {
            parts.push(format!("{} {}", "#".repeat(self.level), self.heading));
        }
        if !self.content.is_empty() {
            parts.push(self.content.clone());
        }
        parts.join("\n")
    }
}

/// Line-oriented parser producing an ordered section list.
#[derive(Debug, Clone, Default)]
pub struct StructureParser;

impl StructureParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses normalized text into sections. The optional page title becomes
    /// a level-0 section with no content, used only for title composition.
    pub fn parse(&self, text: &str, page_title: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        // Active hierarchy: index 0 is `#`, 1 is `##`, 2 is `###`.
        let mut stack: [Option<String>; MAX_HEADING_DEPTH] = [const { None }; MAX_HEADING_DEPTH];
        let mut paragraph: Vec<&str> = Vec::new();

        if !page_title.is_empty() {
            sections.push(Section {
                content: String::new(),
                level: 0,
                heading: page_title.to_string(),
                parent_headings: Vec::new(),
            });
        }

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                flush_paragraph(&mut sections, &mut paragraph, &stack);
                continue;
            }

            if let Some(caps) = HEADING_LINE.captures(line) {
                let depth = caps[1].len();
                let heading = caps[2].trim().to_string();

                if depth <= MAX_HEADING_DEPTH {
                    flush_paragraph(&mut sections, &mut paragraph, &stack);
                    let parent_headings = active_headings(&stack, depth - 1);
                    stack[depth - 1] = Some(heading.clone());
                    for deeper in depth..MAX_HEADING_DEPTH {
                        stack[deeper] = None;
                    }
                    sections.push(Section {
                        content: String::new(),
                        level: depth,
                        heading,
                        parent_headings,
                    });
                    continue;
                }
                // `####`+ stays paragraph content under the current stack.
                paragraph.push(caps.get(2).map_or(line, |m| m.as_str()));
                continue;
            }

            paragraph.push(line);
        }

        flush_paragraph(&mut sections, &mut paragraph, &stack);
        sections
    }
}

fn flush_paragraph(
    sections: &mut Vec<Section>,
    paragraph: &mut Vec<&str>,
    stack: &[Option<String>; MAX_HEADING_DEPTH],
) {
    if paragraph.is_empty() {
        return;
    }
    sections.push(Section {
        content: paragraph.join("\n"),
        level: MAX_HEADING_DEPTH + 1,
        heading: String::new(),
        parent_headings: active_headings(stack, MAX_HEADING_DEPTH),
    });
    paragraph.clear();
}

fn active_headings(stack: &[Option<String>; MAX_HEADING_DEPTH], max_depth: usize) -> Vec<String> {
    stack
        .iter()
        .take(max_depth.min(MAX_HEADING_DEPTH))
        .filter_map(|slot| slot.clone())
        .collect()
}
