//! Per-document change detection.
//!
//! Compares a freshly chunked document against the hashes already stored
//! for the same `doc_id` and decides which chunks need (re)embedding. This
//! never touches the store; it only computes the work set.

use std::collections::HashMap;

use crate::record::{PendingChunk, parse_doc_key};

/// Result of comparing new chunks against stored hashes for one document.
#[derive(Debug, Default)]
pub struct ResumePlan {
    /// Stored hash matches; record and vector stay untouched.
    pub unchanged: Vec<PendingChunk>,
    /// Key absent or hash differs; requires embedding and an upsert.
    pub to_embed: Vec<PendingChunk>,
    /// Stored keys whose index is beyond the new chunk count. Deleted only
    /// after the document's new chunks are durably written.
    pub orphaned_keys: Vec<String>,
}

/// Partition `chunks` for one document given the stored
/// `doc_key -> content_hash` pairs for that same document.
///
/// With `resume` disabled every chunk is treated as changed, but orphan
/// detection still runs so a shrunken document is cleaned up either way.
/// `existing` must only contain keys for this document's `doc_id`; hash
/// equality against another document is never consulted because lookups go
/// through the full key.
pub fn plan_document(
    chunks: Vec<PendingChunk>,
    existing: &HashMap<String, String>,
    resume: bool,
) -> ResumePlan {
    let new_count = chunks.len();
    let mut plan = ResumePlan::default();

    for chunk in chunks {
        let key = chunk.doc_key();
        let matches = resume
            && existing.get(&key).map(|h| *h == chunk.content_hash).unwrap_or(false);
        if matches {
            plan.unchanged.push(chunk);
        } else {
            plan.to_embed.push(chunk);
        }
    }

    for key in existing.keys() {
        let stale = match parse_doc_key(key) {
            Some((_, index)) => index >= new_count,
            // Unparseable keys can never be produced again; treat as stale.
            None => true,
        };
        if stale {
            plan.orphaned_keys.push(key.clone());
        }
    }
    plan.orphaned_keys.sort();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;

    fn chunk(doc_id: &str, index: usize, text: &str) -> PendingChunk {
        PendingChunk {
            doc_id: doc_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            content_hash: content_hash(text),
            breadcrumbs: vec![],
        }
    }

    fn stored(chunks: &[PendingChunk]) -> HashMap<String, String> {
        chunks
            .iter()
            .map(|c| (c.doc_key(), c.content_hash.clone()))
            .collect()
    }

    #[test]
    fn fresh_document_is_all_new() {
        let chunks = vec![chunk("d", 0, "alpha"), chunk("d", 1, "beta")];
        let plan = plan_document(chunks, &HashMap::new(), true);

        assert!(plan.unchanged.is_empty());
        assert_eq!(plan.to_embed.len(), 2);
        assert!(plan.orphaned_keys.is_empty());
    }

    #[test]
    fn identical_rerun_skips_everything() {
        let chunks = vec![chunk("d", 0, "alpha"), chunk("d", 1, "beta")];
        let existing = stored(&chunks);

        let plan = plan_document(chunks, &existing, true);
        assert_eq!(plan.unchanged.len(), 2);
        assert!(plan.to_embed.is_empty());
        assert!(plan.orphaned_keys.is_empty());
    }

    #[test]
    fn single_edit_invalidates_only_that_chunk() {
        let original = vec![
            chunk("d", 0, "alpha"),
            chunk("d", 1, "beta"),
            chunk("d", 2, "gamma"),
        ];
        let existing = stored(&original);

        let edited = vec![
            chunk("d", 0, "alpha"),
            chunk("d", 1, "beta revised"),
            chunk("d", 2, "gamma"),
        ];
        let plan = plan_document(edited, &existing, true);

        assert_eq!(plan.unchanged.len(), 2);
        assert_eq!(plan.to_embed.len(), 1);
        assert_eq!(plan.to_embed[0].chunk_index, 1);
    }

    #[test]
    fn resume_disabled_embeds_everything() {
        let chunks = vec![chunk("d", 0, "alpha")];
        let existing = stored(&chunks);

        let plan = plan_document(chunks, &existing, false);
        assert!(plan.unchanged.is_empty());
        assert_eq!(plan.to_embed.len(), 1);
    }

    #[test]
    fn shrinking_document_orphans_tail_keys() {
        let original: Vec<_> =
            (0..5).map(|i| chunk("d", i, &format!("text {i}"))).collect();
        let existing = stored(&original);

        let shorter: Vec<_> =
            (0..3).map(|i| chunk("d", i, &format!("text {i}"))).collect();
        let plan = plan_document(shorter, &existing, true);

        assert_eq!(plan.unchanged.len(), 3);
        assert_eq!(plan.orphaned_keys, vec!["d#3", "d#4"]);
    }

    #[test]
    fn empty_document_orphans_all_keys() {
        let original = vec![chunk("d", 0, "alpha"), chunk("d", 1, "beta")];
        let existing = stored(&original);

        let plan = plan_document(vec![], &existing, true);
        assert!(plan.unchanged.is_empty());
        assert!(plan.to_embed.is_empty());
        assert_eq!(plan.orphaned_keys, vec!["d#0", "d#1"]);
    }

    #[test]
    fn hash_match_requires_same_key() {
        // Another document's chunk with identical text must not satisfy
        // this document's lookup.
        let other = vec![chunk("other", 0, "shared text")];
        let existing = stored(&other);

        let plan = plan_document(vec![chunk("d", 0, "shared text")], &existing, true);
        assert_eq!(plan.to_embed.len(), 1);
    }

    #[test]
    fn work_set_preserves_chunk_order() {
        let chunks: Vec<_> =
            (0..6).map(|i| chunk("d", i, &format!("t {i}"))).collect();
        let plan = plan_document(chunks, &HashMap::new(), true);

        let indices: Vec<_> =
            plan.to_embed.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }
}
