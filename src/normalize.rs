//! Markdown normalization for the ingestion pipeline.
//!
//! Renders markdown into plain-text blocks suitable for chunking: headings
//! keep their text, tables are flattened to `cell | cell` rows, images are
//! replaced by their alt text, and link targets are dropped in favor of the
//! link text. Hash stability downstream depends on this pass being
//! deterministic, so all whitespace decisions happen here.

/// Structural category of a normalized block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading,
    Paragraph,
    /// Flattened table. Treated as atomic by the chunker.
    Table,
    /// Fenced code block contents, kept verbatim.
    Code,
}

/// A contiguous run of normalized text.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    /// Heading trail in effect where this block starts (outermost first).
    pub breadcrumbs: Vec<String>,
}

/// Output of [`normalize_markdown`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedDocument {
    /// `title:` value from YAML front matter, if any.
    pub front_matter_title: Option<String>,
    pub blocks: Vec<Block>,
}

impl NormalizedDocument {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total whitespace-word count across all blocks.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }
}

/// Convert raw markdown into an ordered sequence of plain-text blocks.
pub fn normalize_markdown(raw: &str) -> NormalizedDocument {
    let mut doc = NormalizedDocument::default();
    let mut lines = raw.lines().peekable();

    // YAML front matter: a leading `---` fence closed by another.
    if lines.peek().map(|l| l.trim() == "---").unwrap_or(false) {
        let mut consumed: Vec<&str> = vec![lines.next().unwrap()];
        let mut closed = false;
        for line in lines.by_ref() {
            consumed.push(line);
            if line.trim() == "---" {
                closed = true;
                break;
            }
            if let Some(value) = line.trim().strip_prefix("title:") {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if !value.is_empty() {
                    doc.front_matter_title = Some(value.to_string());
                }
            }
        }
        if !closed {
            // Not front matter after all; re-parse the consumed lines.
            doc.front_matter_title = None;
            let rest: Vec<&str> = consumed;
            parse_blocks(rest.into_iter(), &mut doc);
            return doc;
        }
    }

    parse_blocks(lines, &mut doc);
    doc
}

fn parse_blocks<'a, I: Iterator<Item = &'a str>>(
    lines: I,
    doc: &mut NormalizedDocument,
) {
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut in_fence: Option<&'static str> = None;
    let mut fence_lines: Vec<String> = Vec::new();
    let mut table_rows: Vec<String> = Vec::new();

    let breadcrumbs =
        |headings: &[(usize, String)]| -> Vec<String> {
            headings.iter().map(|(_, t)| t.clone()).collect()
        };

    macro_rules! flush_paragraph {
        () => {
            if !paragraph.is_empty() {
                doc.blocks.push(Block {
                    kind: BlockKind::Paragraph,
                    text: paragraph.join(" "),
                    breadcrumbs: breadcrumbs(&headings),
                });
                paragraph.clear();
            }
        };
    }

    macro_rules! flush_table {
        () => {
            if !table_rows.is_empty() {
                doc.blocks.push(Block {
                    kind: BlockKind::Table,
                    text: table_rows.join("\n"),
                    breadcrumbs: breadcrumbs(&headings),
                });
                table_rows.clear();
            }
        };
    }

    for line in lines {
        let trimmed = line.trim();

        if let Some(marker) = in_fence {
            if trimmed.starts_with(marker) {
                in_fence = None;
                let text = fence_lines.join("\n").trim().to_string();
                if !text.is_empty() {
                    doc.blocks.push(Block {
                        kind: BlockKind::Code,
                        text,
                        breadcrumbs: breadcrumbs(&headings),
                    });
                }
                fence_lines.clear();
            } else {
                fence_lines.push(line.to_string());
            }
            continue;
        }

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            flush_paragraph!();
            flush_table!();
            in_fence = Some(if trimmed.starts_with("```") { "```" } else { "~~~" });
            continue;
        }

        if trimmed.starts_with('|') {
            flush_paragraph!();
            if let Some(row) = flatten_table_row(trimmed) {
                table_rows.push(row);
            }
            continue;
        }
        flush_table!();

        if trimmed.is_empty() || is_thematic_break(trimmed) {
            flush_paragraph!();
            continue;
        }

        if let Some((level, text)) = parse_heading(trimmed) {
            flush_paragraph!();
            let text = clean_inline(&text);
            while headings.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                headings.pop();
            }
            doc.blocks.push(Block {
                kind: BlockKind::Heading,
                text: text.clone(),
                breadcrumbs: breadcrumbs(&headings),
            });
            headings.push((level, text));
            continue;
        }

        let cleaned = clean_inline(strip_list_marker(trimmed));
        if !cleaned.is_empty() {
            paragraph.push(cleaned);
        }
    }

    // Unterminated fence: keep what we saw as code.
    if in_fence.is_some() {
        let text = fence_lines.join("\n").trim().to_string();
        if !text.is_empty() {
            doc.blocks.push(Block {
                kind: BlockKind::Code,
                text,
                breadcrumbs: breadcrumbs(&headings),
            });
        }
    }
    flush_paragraph!();
    flush_table!();
}

fn is_thematic_break(trimmed: &str) -> bool {
    trimmed.len() >= 3
        && (trimmed.chars().all(|c| c == '-')
            || trimmed.chars().all(|c| c == '*')
            || trimmed.chars().all(|c| c == '_'))
}

fn parse_heading(trimmed: &str) -> Option<(usize, String)> {
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    if text.is_empty() {
        return None;
    }
    Some((level, text.to_string()))
}

/// Flatten one markdown table row into `cell | cell | cell`.
///
/// Alignment separator rows (`| --- | :-: |`) are dropped.
fn flatten_table_row(trimmed: &str) -> Option<String> {
    let inner = trimmed.trim_matches('|');
    let cells: Vec<String> = inner
        .split('|')
        .map(|c| clean_inline(c.trim()))
        .collect();

    let is_separator = cells.iter().all(|c| {
        !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':' || ch == ' ')
    });
    if is_separator {
        return None;
    }
    if cells.iter().all(|c| c.is_empty()) {
        return None;
    }
    Some(cells.join(" | "))
}

fn strip_list_marker(trimmed: &str) -> &str {
    for marker in ["- ", "* ", "+ ", "> "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest.trim_start();
        }
    }
    // Ordered list: digits followed by `. ` or `) `.
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim_start();
        }
    }
    trimmed
}

/// Resolve inline markdown: images become `(image: alt)`, links keep their
/// text, strong-emphasis markers and backticks are removed.
fn clean_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut iter = line.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if c == '!'
            && line[i + 1..].starts_with('[')
            && let Some((alt, _, end)) = parse_bracket_pair(line, i + 1)
        {
            if !alt.trim().is_empty() {
                out.push_str("(image: ");
                out.push_str(alt.trim());
                out.push(')');
            }
            skip_to(&mut iter, end);
            continue;
        }
        if c == '['
            && let Some((text, _, end)) = parse_bracket_pair(line, i)
        {
            out.push_str(&clean_inline(text));
            skip_to(&mut iter, end);
            continue;
        }
        out.push(c);
    }

    strip_emphasis(&out)
}

fn skip_to(
    iter: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    end: usize,
) {
    while iter.peek().map(|&(j, _)| j < end).unwrap_or(false) {
        iter.next();
    }
}

/// Parse `[text](target)` starting at the `[` byte offset. Returns
/// `(text, target, end_offset)` past the closing parenthesis.
fn parse_bracket_pair(line: &str, open: usize) -> Option<(&str, &str, usize)> {
    let bytes = line.as_bytes();
    let mut depth = 0usize;
    let mut close = None;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    if close + 1 >= bytes.len() || bytes[close + 1] != b'(' {
        return None;
    }
    let paren_close = line[close + 1..].find(')').map(|p| close + 1 + p)?;
    Some((
        &line[open + 1..close],
        &line[close + 2..paren_close],
        paren_close + 1,
    ))
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace('`', "")
}
