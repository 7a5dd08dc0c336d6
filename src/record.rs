use serde::{Deserialize, Serialize};

/// Build the globally unique chunk key for `(doc_id, chunk_index)`.
///
/// Format: `path/to/doc#3`. Stable across runs as long as the document's
/// chunk boundaries don't shift.
pub fn doc_key(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}#{chunk_index}")
}

/// Split a chunk key back into `(doc_id, chunk_index)`.
///
/// Returns `None` if the key has no `#<index>` suffix.
pub fn parse_doc_key(key: &str) -> Option<(&str, usize)> {
    let (doc_id, idx) = key.rsplit_once('#')?;
    Some((doc_id, idx.parse().ok()?))
}

/// A chunk produced by the chunker, carrying everything needed for change
/// detection but no embedding yet.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub doc_id: String,
    /// Zero-based position within the document's chunk sequence.
    pub chunk_index: usize,
    /// Full normalized chunk text. Hash and embedding are both computed
    /// from exactly this string.
    pub text: String,
    /// Approximate token count (whitespace words).
    pub token_count: usize,
    /// `sha256:<hex>` digest of `text`.
    pub content_hash: String,
    /// Heading trail of the chunk's first block.
    pub breadcrumbs: Vec<String>,
}

impl PendingChunk {
    pub fn doc_key(&self) -> String {
        doc_key(&self.doc_id, self.chunk_index)
    }
}

/// Persisted chunk record — the wire contract with downstream search tools.
///
/// Field changes must be additive-only. The embedding vector is stored
/// out-of-band by the chunk store and is skipped during JSON serialization;
/// every record reaching the store carries a computed vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub doc_key: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub title: String,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    pub section: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub web_url: String,
    pub repo_url: String,
    /// Chunk text, possibly truncated to the configured snippet budget.
    pub chunk_text: String,
    pub token_count: usize,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    /// Source commit reference used to build `repo_url`.
    pub sha: String,
    #[serde(default)]
    pub access_groups: Vec<String>,
    /// ISO-8601 processing timestamp.
    pub updated_at: String,
    pub content_hash: String,
    /// Source corpus identifier (e.g. "gitlab-handbook").
    pub source: String,
}

/// Truncate text to at most `max_chars` characters, respecting UTF-8
/// boundaries. `max_chars == 0` means unlimited.
pub fn snippet(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
