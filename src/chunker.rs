//! Token-budgeted chunk splitting with configurable overlap.
//!
//! Operates on normalized blocks, preferring sentence and block boundaries
//! over mid-sentence splits. "Token" here means a whitespace-separated word,
//! an approximation of real model tokenization; counts are documented as
//! approximate throughout and must not be read as exact tokenizer parity.

use crate::{
    error::{Error, Result},
    normalize::{Block, BlockKind, NormalizedDocument},
};

pub const DEFAULT_MAX_TOKENS: usize = 550;
pub const DEFAULT_OVERLAP_TOKENS: usize = 80;

/// Chunk splitting parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Maximum approximate tokens per chunk.
    pub max_tokens: usize,
    /// Approximate tokens carried over from each chunk's tail into the next.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl ChunkerConfig {
    /// Reject invalid configurations before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::Config(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(Error::Config(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Approximate token count: whitespace-separated words.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// One bounded slice of a document's normalized text.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// Zero-based position in the document's chunk sequence.
    pub index: usize,
    pub text: String,
    /// Approximate token count of `text`.
    pub token_count: usize,
    /// Heading trail of the chunk's first block.
    pub breadcrumbs: Vec<String>,
}

/// Split a normalized document into token-bounded, overlapping chunks.
///
/// Every chunk stays within `max_tokens` except a table wider than the
/// budget, which becomes its own oversized chunk rather than being split.
/// Empty input yields an empty sequence.
pub fn split_document(
    doc: &NormalizedDocument,
    config: &ChunkerConfig,
) -> Result<Vec<TextChunk>> {
    split_blocks(&doc.blocks, config)
}

struct Unit<'a> {
    text: &'a str,
    atomic: bool,
    breadcrumbs: &'a [String],
}

/// See [`split_document`].
pub fn split_blocks(
    blocks: &[Block],
    config: &ChunkerConfig,
) -> Result<Vec<TextChunk>> {
    config.validate()?;

    let mut units: Vec<Unit<'_>> = Vec::new();
    for block in blocks {
        match block.kind {
            BlockKind::Table => units.push(Unit {
                text: &block.text,
                atomic: true,
                breadcrumbs: &block.breadcrumbs,
            }),
            BlockKind::Heading | BlockKind::Code => units.push(Unit {
                text: &block.text,
                atomic: false,
                breadcrumbs: &block.breadcrumbs,
            }),
            BlockKind::Paragraph => {
                for sentence in split_sentences(&block.text) {
                    units.push(Unit {
                        text: sentence,
                        atomic: false,
                        breadcrumbs: &block.breadcrumbs,
                    });
                }
            }
        }
    }

    let mut builder = ChunkBuilder::new(config);
    for unit in &units {
        builder.push_unit(unit);
    }
    Ok(builder.finish())
}

struct ChunkBuilder<'c> {
    config: &'c ChunkerConfig,
    chunks: Vec<TextChunk>,
    parts: Vec<String>,
    tokens: usize,
    /// Tokens in `parts` that are carried-over overlap, not new content.
    seed_tokens: usize,
    breadcrumbs: Option<Vec<String>>,
}

impl<'c> ChunkBuilder<'c> {
    fn new(config: &'c ChunkerConfig) -> Self {
        Self {
            config,
            chunks: Vec::new(),
            parts: Vec::new(),
            tokens: 0,
            seed_tokens: 0,
            breadcrumbs: None,
        }
    }

    fn has_content(&self) -> bool {
        self.tokens > self.seed_tokens
    }

    fn push_unit(&mut self, unit: &Unit<'_>) {
        let n = count_tokens(unit.text);
        if n == 0 {
            return;
        }

        let max = self.config.max_tokens;

        if self.has_content() && self.tokens + n > max {
            self.finalize();
        }

        if unit.atomic {
            // A table never splits. If it cannot share a chunk even with
            // just the overlap seed, it starts clean and may run oversized.
            if self.tokens + n > max {
                self.parts.clear();
                self.tokens = 0;
                self.seed_tokens = 0;
            }
            self.push_part(unit);
            if self.tokens > max {
                self.finalize();
            }
            return;
        }

        if self.tokens + n > max {
            // Single sentence larger than the remaining budget of a fresh
            // chunk: fall back to splitting at the token boundary.
            for word in unit.text.split_whitespace() {
                if self.tokens + 1 > max {
                    self.finalize();
                }
                self.push_words(word, 1, unit.breadcrumbs);
            }
            return;
        }

        self.push_part(unit);
    }

    fn push_part(&mut self, unit: &Unit<'_>) {
        let n = count_tokens(unit.text);
        self.push_words(unit.text, n, unit.breadcrumbs);
    }

    fn push_words(&mut self, text: &str, n: usize, breadcrumbs: &[String]) {
        if self.breadcrumbs.is_none() {
            self.breadcrumbs = Some(breadcrumbs.to_vec());
        }
        self.parts.push(text.to_string());
        self.tokens += n;
    }

    fn finalize(&mut self) {
        let text = self.parts.join(" ");
        let token_count = count_tokens(&text);
        if token_count == 0 {
            return;
        }

        let breadcrumbs = self
            .breadcrumbs
            .take()
            .or_else(|| self.chunks.last().map(|c| c.breadcrumbs.clone()))
            .unwrap_or_default();

        self.chunks.push(TextChunk {
            index: self.chunks.len(),
            text,
            token_count,
            breadcrumbs,
        });

        // Seed the next chunk with the tail of this one.
        self.parts.clear();
        self.tokens = 0;
        self.seed_tokens = 0;
        let overlap = self.config.overlap_tokens;
        if overlap > 0 {
            let last = &self.chunks[self.chunks.len() - 1];
            let words: Vec<&str> = last.text.split_whitespace().collect();
            let start = words.len().saturating_sub(overlap);
            let seed = words[start..].join(" ");
            let seed_count = words.len() - start;
            if seed_count > 0 {
                self.parts.push(seed);
                self.tokens = seed_count;
                self.seed_tokens = seed_count;
            }
        }
    }

    fn finish(mut self) -> Vec<TextChunk> {
        // A trailing seed with no new content would be pure duplication.
        if self.has_content() {
            self.finalize();
        }
        self.chunks
    }
}

/// Split prose into sentence-ish pieces at `.`, `!`, or `?` followed by
/// whitespace. Deliberately naive; the chunker only needs plausible
/// boundaries, not linguistic precision.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().map(|&(_, next)| next.is_whitespace()).unwrap_or(false)
        {
            let end = idx + c.len_utf8();
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_markdown;

    fn cfg(max: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: max,
            overlap_tokens: overlap,
        }
    }

    fn para(text: &str) -> Block {
        Block {
            kind: BlockKind::Paragraph,
            text: text.to_string(),
            breadcrumbs: vec![],
        }
    }

    fn word_soup(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    /// Reconstruct the token stream by dropping each chunk's overlap seed.
    fn reconstruct(chunks: &[TextChunk], overlap: usize) -> Vec<String> {
        let mut words = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut tokens: Vec<&str> = chunk.text.split_whitespace().collect();
            if i > 0 && overlap > 0 {
                let prev: Vec<&str> =
                    chunks[i - 1].text.split_whitespace().collect();
                let tail_start = prev.len().saturating_sub(overlap);
                let tail = &prev[tail_start..];
                if tokens.starts_with(tail) {
                    tokens.drain(..tail.len());
                }
            }
            words.extend(tokens.iter().map(|w| w.to_string()));
        }
        words
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = split_blocks(&[], &cfg(100, 10)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_budget() {
        assert!(split_blocks(&[], &cfg(100, 100)).is_err());
        assert!(split_blocks(&[], &cfg(100, 150)).is_err());
        assert!(split_blocks(&[], &cfg(0, 0)).is_err());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let blocks = vec![para("just a few words here.")];
        let chunks = split_blocks(&blocks, &cfg(100, 10)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].token_count, 5);
    }

    #[test]
    fn every_chunk_respects_the_budget() {
        let blocks = vec![para(&word_soup(1000))];
        let chunks = split_blocks(&blocks, &cfg(100, 20)).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100, "chunk over budget: {}", chunk.token_count);
        }
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let blocks = vec![para(&word_soup(500))];
        let chunks = split_blocks(&blocks, &cfg(100, 20)).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn adjacent_chunks_share_the_overlap() {
        let blocks = vec![para(&word_soup(300))];
        let overlap = 20;
        let chunks = split_blocks(&blocks, &cfg(100, overlap)).unwrap();
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            let tail = &prev[prev.len() - overlap..];
            assert_eq!(&next[..overlap], tail, "overlap region mismatch");
        }
    }

    #[test]
    fn dropping_overlaps_reconstructs_the_text() {
        let source = word_soup(777);
        let blocks = vec![para(&source)];
        let chunks = split_blocks(&blocks, &cfg(90, 15)).unwrap();

        let rebuilt = reconstruct(&chunks, 15).join(" ");
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn zero_overlap_chunks_are_disjoint() {
        let source = word_soup(250);
        let blocks = vec![para(&source)];
        let chunks = split_blocks(&blocks, &cfg(100, 0)).unwrap();

        let rebuilt = reconstruct(&chunks, 0).join(" ");
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn sentence_boundaries_are_preferred() {
        // Each sentence is 10 tokens; budget 25 fits two sentences.
        let sentence = "one two three four five six seven eight nine ten.";
        let text = [sentence; 4].join(" ");
        let blocks = vec![para(&text)];

        let chunks = split_blocks(&blocks, &cfg(25, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.text.ends_with("ten."), "split mid-sentence: {}", chunk.text);
        }
    }

    #[test]
    fn oversized_table_becomes_its_own_chunk() {
        let table = Block {
            kind: BlockKind::Table,
            text: word_soup(40),
            breadcrumbs: vec![],
        };
        let blocks = vec![para("intro words here."), table, para("outro words here.")];

        let chunks = split_blocks(&blocks, &cfg(10, 2)).unwrap();
        let table_chunk = chunks.iter().find(|c| c.token_count == 40).unwrap();
        assert!(table_chunk.text.starts_with("w0 "), "table must not carry a seed");
        for chunk in &chunks {
            assert!(chunk.token_count <= 10 || chunk.token_count == 40);
        }
    }

    #[test]
    fn small_table_shares_a_chunk_with_prose() {
        let table = Block {
            kind: BlockKind::Table,
            text: "a | b\nc | d".to_string(),
            breadcrumbs: vec![],
        };
        let blocks = vec![para("intro."), table];
        let chunks = split_blocks(&blocks, &cfg(100, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("a | b"));
    }

    #[test]
    fn giant_sentence_splits_at_token_boundary() {
        // One "sentence" with no terminators, larger than the budget.
        let blocks = vec![para(&word_soup(95))];
        let chunks = split_blocks(&blocks, &cfg(30, 5)).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 30);
        }
        let rebuilt = reconstruct(&chunks, 5).join(" ");
        assert_eq!(rebuilt, word_soup(95));
    }

    #[test]
    fn onboarding_scenario_four_chunks() {
        // 1800 normalized tokens at max=550/overlap=80 -> 4 chunks, 0..=3.
        let source = word_soup(1800);
        let blocks = vec![para(&source)];
        let chunks = split_blocks(&blocks, &cfg(550, 80)).unwrap();

        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_count <= 550);
        }
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&next[..80], &prev[prev.len() - 80..]);
        }
        assert_eq!(reconstruct(&chunks, 80).join(" "), source);
    }

    #[test]
    fn chunk_inherits_breadcrumbs_of_first_block() {
        let md = "# Guide\n\n## Part One\n\nalpha beta gamma.\n\n## Part Two\n\ndelta epsilon zeta.\n";
        let doc = normalize_markdown(md);
        let chunks = split_document(&doc, &cfg(6, 0)).unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks[0].breadcrumbs.is_empty() || chunks[0].breadcrumbs == vec!["Guide"]);
        let last = chunks.last().unwrap();
        assert!(last.breadcrumbs.contains(&"Guide".to_string()));
    }

    #[test]
    fn token_counts_match_reported_text() {
        let blocks = vec![para(&word_soup(333))];
        let chunks = split_blocks(&blocks, &cfg(80, 10)).unwrap();
        for chunk in &chunks {
            assert_eq!(chunk.token_count, count_tokens(&chunk.text));
        }
    }
}
