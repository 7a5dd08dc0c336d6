//! Brute-force semantic query over a stored collection.
//!
//! This is a verification utility, not a ranking engine: it embeds the
//! query, scans every stored vector with cosine similarity, and optionally
//! stitches runs of adjacent chunks from the same document into larger
//! context blocks.

use std::collections::BTreeMap;

use crate::{
    embedder::{EmbeddingProvider, embed_query},
    error::Result,
    record::ChunkRecord,
    store::RedbChunkStore,
};

/// A scored chunk.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub record: ChunkRecord,
}

/// A run of adjacent chunks from one document, merged for display.
#[derive(Debug, Clone)]
pub struct StitchedContext {
    pub doc_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub title: String,
    pub web_url: String,
    /// Mean score of the member chunks.
    pub score: f32,
    pub context: String,
}

/// Embed the query and return the top `k` chunks above `min_score`.
pub fn search(
    store: &RedbChunkStore,
    provider: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
    min_score: f32,
) -> Result<Vec<SearchHit>> {
    let query_vec = embed_query(provider, query)?;
    let records = store.all_records()?;
    Ok(rank(records, &query_vec, k, min_score))
}

/// Score records against a query vector, best first.
pub fn rank(
    records: Vec<ChunkRecord>,
    query_vec: &[f32],
    k: usize,
    min_score: f32,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = records
        .into_iter()
        .filter(|r| !r.embedding.is_empty())
        .map(|record| SearchHit {
            score: cosine(query_vec, &record.embedding),
            record,
        })
        .filter(|hit| hit.score >= min_score)
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

/// Cosine similarity; zero for mismatched or zero-norm vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Merge hits from the same document whose chunk indices are consecutive,
/// keeping at most `max_per_doc` runs per document. Output is ordered by
/// mean score, best first.
pub fn stitch_adjacent(
    hits: &[SearchHit],
    max_per_doc: usize,
) -> Vec<StitchedContext> {
    let mut by_doc: BTreeMap<&str, Vec<&SearchHit>> = BTreeMap::new();
    for hit in hits {
        by_doc.entry(&hit.record.doc_id).or_default().push(hit);
    }

    let mut stitched = Vec::new();
    for (doc_id, mut doc_hits) in by_doc {
        doc_hits.sort_by_key(|h| h.record.chunk_index);

        let mut runs: Vec<Vec<&SearchHit>> = Vec::new();
        for hit in doc_hits {
            match runs.last_mut() {
                Some(run)
                    if run
                        .last()
                        .map(|prev| {
                            prev.record.chunk_index + 1
                                == hit.record.chunk_index
                        })
                        .unwrap_or(false) =>
                {
                    run.push(hit);
                }
                _ => runs.push(vec![hit]),
            }
        }

        for run in runs.into_iter().take(max_per_doc) {
            let score =
                run.iter().map(|h| h.score).sum::<f32>() / run.len() as f32;
            let context = run
                .iter()
                .map(|h| h.record.chunk_text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let first = run[0];
            stitched.push(StitchedContext {
                doc_id: doc_id.to_string(),
                start_index: first.record.chunk_index,
                end_index: run[run.len() - 1].record.chunk_index,
                title: first.record.title.clone(),
                web_url: first.record.web_url.clone(),
                score,
                context,
            });
        }
    }

    stitched.sort_by(|a, b| b.score.total_cmp(&a.score));
    stitched
}
