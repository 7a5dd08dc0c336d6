//! The ingestion pipeline.
//!
//! Per document: load -> normalize -> chunk -> hash -> resume filter ->
//! batch embedder -> store writer. Embedding batches span documents to keep
//! provider batches full; a document's orphaned keys are deleted only after
//! all of its new chunks are durably written, so an interrupted run is
//! always safe to re-run under resume.

use std::{path::PathBuf, thread, time::Duration};

use kdam::{BarExt, tqdm};

use crate::{
    chunker::{self, ChunkerConfig},
    embedder::{BatchQueue, EmbeddingProvider, embed_passages},
    error::{Error, Result},
    hash::content_hash,
    loader::{self, SourceDocument},
    normalize,
    record::{ChunkRecord, PendingChunk, snippet},
    resume,
    store::ChunkStore,
    urls::UrlResolver,
};

/// Documents with fewer normalized words than this are skipped as noise.
const MIN_DOC_WORDS: usize = 10;

/// Bounded retries for store writes and deletes.
const STORE_RETRIES: usize = 3;

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_SNIPPET_CHARS: usize = 1000;

/// Parameters for one ingestion run, passed into the core as a single
/// record. The core validates only its own invariants.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Corpus root directory.
    pub root: PathBuf,
    /// Target collection name.
    pub collection: String,
    /// Commit reference recorded into each chunk and used for repo URLs.
    pub commit_sha: String,
    pub chunker: ChunkerConfig,
    /// Maximum texts per embedding provider call.
    pub batch_size: usize,
    /// Skip re-embedding chunks whose stored hash matches.
    pub resume: bool,
    /// Stored chunk_text character budget; 0 keeps full text.
    pub snippet_chars: usize,
    /// Process at most this many files; 0 means all.
    pub max_files: usize,
    /// Source corpus identifier recorded per chunk.
    pub source: String,
    pub access_groups: Vec<String>,
    pub tags: Vec<String>,
    /// Relative paths matching any of these globs are not ingested.
    pub exclude: Option<globset::GlobSet>,
}

impl RunConfig {
    /// Fail fast, before any I/O, on invalid parameters.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        if self.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than zero".into(),
            ));
        }
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "corpus root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Explicitly passed context owning the store and provider handles for the
/// duration of one run.
pub struct IngestContext<'a> {
    pub store: &'a dyn ChunkStore,
    pub provider: &'a dyn EmbeddingProvider,
    pub urls: &'a UrlResolver,
    pub config: &'a RunConfig,
}

/// Outcome counters for a finished run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub files_seen: usize,
    pub files_skipped_short: usize,
    pub files_failed_load: usize,
    pub documents_completed: usize,
    pub documents_failed: usize,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub chunks_unchanged: usize,
    pub orphans_deleted: usize,
    pub failed_batches: usize,
    /// doc_ids skipped due to load errors, for the end-of-run report.
    pub skipped_documents: Vec<String>,
}

struct DocState {
    doc_id: String,
    /// Chunks queued for embedding but not yet written.
    outstanding: usize,
    orphaned_keys: Vec<String>,
    failed: bool,
    finalized: bool,
}

struct WorkItem {
    doc_seq: usize,
    /// Record with every field populated except the embedding.
    record: ChunkRecord,
    /// Full chunk text; hash and embedding both come from exactly this.
    embed_text: String,
}

/// Run the full ingestion pipeline over the configured corpus.
///
/// Per-document and per-batch failures are isolated and reported through
/// the summary; only configuration errors abort the run.
pub fn run_ingest(ctx: &IngestContext<'_>) -> Result<RunSummary> {
    ctx.config.validate()?;

    let mut docs =
        loader::discover_documents(&ctx.config.root, ctx.config.exclude.as_ref())?;
    if ctx.config.max_files > 0 {
        docs.truncate(ctx.config.max_files);
    }
    tracing::info!(files = docs.len(), collection = %ctx.config.collection, "starting ingestion");

    let updated_at = chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    let mut summary = RunSummary::default();
    let mut states: Vec<DocState> = Vec::new();
    let mut queue: BatchQueue<WorkItem> =
        BatchQueue::new(ctx.config.batch_size);
    let mut pb = tqdm!(total = docs.len(), desc = "Ingesting");

    for doc in &docs {
        summary.files_seen += 1;

        if let Err(err) = process_document(
            ctx,
            doc,
            &updated_at,
            &mut states,
            &mut queue,
            &mut summary,
        ) {
            tracing::warn!(doc_id = %doc.doc_id, error = %err, "skipping document");
            summary.files_failed_load += 1;
            summary.skipped_documents.push(doc.doc_id.clone());
        }

        while let Some(batch) = queue.take_full() {
            flush_batch(ctx, batch, &mut states, &mut summary);
        }
        finalize_ready(ctx, &mut states, &mut summary);

        let _ = pb.update(1);
    }

    if let Some(batch) = queue.take_remaining() {
        flush_batch(ctx, batch, &mut states, &mut summary);
    }
    finalize_ready(ctx, &mut states, &mut summary);

    for state in &states {
        if state.failed {
            summary.documents_failed += 1;
        }
    }

    tracing::info!(
        completed = summary.documents_completed,
        failed = summary.documents_failed,
        embedded = summary.chunks_embedded,
        unchanged = summary.chunks_unchanged,
        "ingestion finished"
    );
    Ok(summary)
}

/// Chunk one document and enqueue its work set.
fn process_document(
    ctx: &IngestContext<'_>,
    doc: &SourceDocument,
    updated_at: &str,
    states: &mut Vec<DocState>,
    queue: &mut BatchQueue<WorkItem>,
    summary: &mut RunSummary,
) -> Result<()> {
    let raw = std::fs::read_to_string(&doc.absolute_path)?;
    let normalized = normalize::normalize_markdown(&raw);

    let existing = ctx.store.get_existing_hashes(&doc.doc_id)?;

    if normalized.word_count() < MIN_DOC_WORDS {
        summary.files_skipped_short += 1;
        // A document gutted below the noise threshold still sheds its
        // previously stored chunks.
        if !existing.is_empty() {
            let keys: Vec<String> = {
                let mut keys: Vec<_> = existing.into_keys().collect();
                keys.sort();
                keys
            };
            with_store_retries("delete", || ctx.store.delete_keys(&keys))?;
            summary.orphans_deleted += keys.len();
        }
        return Ok(());
    }

    let title = loader::resolve_title(
        normalized.front_matter_title.as_deref(),
        &raw,
        &doc.title,
    );

    let chunks = chunker::split_document(&normalized, &ctx.config.chunker)?;
    summary.chunks_total += chunks.len();

    let pending: Vec<PendingChunk> = chunks
        .into_iter()
        .map(|chunk| PendingChunk {
            doc_id: doc.doc_id.clone(),
            chunk_index: chunk.index,
            content_hash: content_hash(&chunk.text),
            token_count: chunk.token_count,
            breadcrumbs: chunk.breadcrumbs,
            text: chunk.text,
        })
        .collect();

    let plan = resume::plan_document(pending, &existing, ctx.config.resume);
    summary.chunks_unchanged += plan.unchanged.len();

    let doc_seq = states.len();
    states.push(DocState {
        doc_id: doc.doc_id.clone(),
        outstanding: plan.to_embed.len(),
        orphaned_keys: plan.orphaned_keys,
        failed: false,
        finalized: false,
    });

    for chunk in plan.to_embed {
        let record = build_record(ctx, doc, &title, &chunk, updated_at);
        queue.push(WorkItem {
            doc_seq,
            record,
            embed_text: chunk.text,
        });
    }

    Ok(())
}

fn build_record(
    ctx: &IngestContext<'_>,
    doc: &SourceDocument,
    title: &str,
    chunk: &PendingChunk,
    updated_at: &str,
) -> ChunkRecord {
    let config = ctx.config;
    ChunkRecord {
        doc_key: chunk.doc_key(),
        doc_id: chunk.doc_id.clone(),
        chunk_index: chunk.chunk_index,
        title: title.to_string(),
        breadcrumbs: chunk.breadcrumbs.clone(),
        section: doc.section.clone(),
        tags: config.tags.clone(),
        web_url: ctx.urls.web_url(&doc.relative_path),
        repo_url: ctx.urls.repo_url(&doc.relative_path),
        chunk_text: snippet(&chunk.text, config.snippet_chars),
        token_count: chunk.token_count,
        embedding: Vec::new(),
        embedding_model: ctx.provider.model_id().to_string(),
        sha: config.commit_sha.clone(),
        access_groups: config.access_groups.clone(),
        updated_at: updated_at.to_string(),
        content_hash: chunk.content_hash.clone(),
        source: config.source.clone(),
    }
}

/// Embed one batch and write its records. A failed batch leaves every one
/// of its chunks unwritten and marks the affected documents failed; other
/// batches are unaffected.
fn flush_batch(
    ctx: &IngestContext<'_>,
    batch: Vec<WorkItem>,
    states: &mut [DocState],
    summary: &mut RunSummary,
) {
    let texts: Vec<String> =
        batch.iter().map(|item| item.embed_text.clone()).collect();

    let vectors = match embed_passages(ctx.provider, &texts) {
        Ok(vectors) => vectors,
        Err(err) => {
            tracing::warn!(chunks = batch.len(), error = %err, "embedding batch failed");
            fail_batch(&batch, states, summary);
            return;
        }
    };

    let mut records = Vec::with_capacity(batch.len());
    for (item, vector) in batch.iter().zip(vectors) {
        let mut record = item.record.clone();
        record.embedding = vector;
        records.push(record);
    }

    let written =
        with_store_retries("upsert", || ctx.store.upsert_chunks(&records));
    if let Err(err) = written {
        tracing::warn!(chunks = batch.len(), error = %err, "store write failed");
        fail_batch(&batch, states, summary);
        return;
    }

    summary.chunks_embedded += batch.len();
    for item in &batch {
        states[item.doc_seq].outstanding -= 1;
    }
}

fn fail_batch(
    batch: &[WorkItem],
    states: &mut [DocState],
    summary: &mut RunSummary,
) {
    summary.failed_batches += 1;
    for item in batch {
        states[item.doc_seq].failed = true;
    }
}

/// Delete orphaned keys for every document whose chunks are all durably
/// written.
fn finalize_ready(
    ctx: &IngestContext<'_>,
    states: &mut [DocState],
    summary: &mut RunSummary,
) {
    for state in states.iter_mut() {
        if state.finalized || state.failed || state.outstanding > 0 {
            continue;
        }

        if !state.orphaned_keys.is_empty() {
            let result = with_store_retries("delete", || {
                ctx.store.delete_keys(&state.orphaned_keys)
            });
            match result {
                Ok(()) => summary.orphans_deleted += state.orphaned_keys.len(),
                Err(err) => {
                    tracing::warn!(doc_id = %state.doc_id, error = %err, "orphan cleanup failed");
                    state.failed = true;
                    continue;
                }
            }
        }

        state.finalized = true;
        summary.documents_completed += 1;
    }
}

fn with_store_retries<F>(op: &str, mut f: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let mut attempt = 0usize;
    loop {
        match f() {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt >= STORE_RETRIES {
                    return Err(err);
                }
                tracing::debug!(op, attempt, error = %err, "retrying store operation");
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{store::RedbChunkStore, urls::UrlResolver};

    /// Deterministic provider: one call counted per batch, vector encodes
    /// the text length.
    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for CountingProvider {
        fn model_id(&self) -> &str {
            "counting-model"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }
    }

    fn config(root: &std::path::Path) -> RunConfig {
        RunConfig {
            root: root.to_path_buf(),
            collection: "test".into(),
            commit_sha: "deadbeef".into(),
            chunker: ChunkerConfig {
                max_tokens: 50,
                overlap_tokens: 10,
            },
            batch_size: 4,
            resume: true,
            snippet_chars: 0,
            max_files: 0,
            source: "unit-test".into(),
            access_groups: vec!["all".into()],
            tags: vec![],
            exclude: None,
        }
    }

    fn write_doc(root: &std::path::Path, name: &str, words: usize) {
        let body: Vec<String> = (0..words).map(|i| format!("word{i}")).collect();
        std::fs::write(
            root.join(name),
            format!("# Title\n\n{}\n", body.join(" ")),
        )
        .unwrap();
    }

    #[test]
    fn validates_configuration_before_io() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.chunker.overlap_tokens = 50;

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };

        assert!(matches!(run_ingest(&ctx), Err(Error::Config(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp.path().join("does-not-exist"));

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };

        assert!(matches!(run_ingest(&ctx), Err(Error::Config(_))));
    }

    #[test]
    fn short_documents_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(corpus.join("stub.md"), "tiny\n").unwrap();
        write_doc(&corpus, "real.md", 40);

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let cfg = config(&corpus);
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };

        let summary = run_ingest(&ctx).unwrap();
        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.files_skipped_short, 1);
        assert_eq!(summary.documents_completed, 1);
        assert!(store.get_existing_hashes("stub").unwrap().is_empty());
    }

    #[test]
    fn rerun_with_resume_makes_no_provider_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        write_doc(&corpus, "a.md", 120);
        write_doc(&corpus, "b.md", 80);

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let cfg = config(&corpus);

        let first = CountingProvider::new();
        let ctx = IngestContext {
            store: &store,
            provider: &first,
            urls: &urls,
            config: &cfg,
        };
        let summary = run_ingest(&ctx).unwrap();
        assert!(summary.chunks_embedded > 0);
        assert!(first.calls.load(Ordering::SeqCst) > 0);

        let second = CountingProvider::new();
        let ctx = IngestContext {
            store: &store,
            provider: &second,
            urls: &urls,
            config: &cfg,
        };
        let summary = run_ingest(&ctx).unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.chunks_embedded, 0);
        assert_eq!(summary.chunks_unchanged, summary.chunks_total);
        assert_eq!(summary.documents_completed, 2);
    }

    #[test]
    fn resume_disabled_re_embeds_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        write_doc(&corpus, "a.md", 60);

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let mut cfg = config(&corpus);

        let provider = CountingProvider::new();
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };
        run_ingest(&ctx).unwrap();

        cfg.resume = false;
        let again = CountingProvider::new();
        let ctx = IngestContext {
            store: &store,
            provider: &again,
            urls: &urls,
            config: &cfg,
        };
        let summary = run_ingest(&ctx).unwrap();
        assert!(again.calls.load(Ordering::SeqCst) > 0);
        assert_eq!(summary.chunks_unchanged, 0);
    }

    #[test]
    fn load_error_skips_only_that_document() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        write_doc(&corpus, "good.md", 40);
        // Invalid UTF-8 forces a read failure.
        std::fs::write(corpus.join("bad.md"), [0xff, 0xfe, 0x01]).unwrap();

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let cfg = config(&corpus);
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };

        let summary = run_ingest(&ctx).unwrap();
        assert_eq!(summary.files_failed_load, 1);
        assert_eq!(summary.skipped_documents, vec!["bad"]);
        assert_eq!(summary.documents_completed, 1);
        assert!(!store.get_existing_hashes("good").unwrap().is_empty());
    }

    #[test]
    fn records_carry_full_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir_all(corpus.join("engineering")).unwrap();
        let body: Vec<String> = (0..30).map(|i| format!("w{i}")).collect();
        std::fs::write(
            corpus.join("engineering/onboarding.md"),
            format!(
                "---\ntitle: \"Onboarding Guide\"\n---\n\n# Ignored\n\n{}\n",
                body.join(" ")
            ),
        )
        .unwrap();

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new(
            "https://handbook.example.com",
            "https://git.example.com/blob",
            "cafe12",
        );
        let cfg = config(&corpus);
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };
        run_ingest(&ctx).unwrap();

        let record = store.get("engineering/onboarding#0").unwrap().unwrap();
        assert_eq!(record.title, "Onboarding Guide");
        assert_eq!(record.section, "engineering");
        assert_eq!(record.embedding_model, "counting-model");
        assert_eq!(record.sha, "cafe12");
        assert_eq!(record.source, "unit-test");
        assert_eq!(record.access_groups, vec!["all"]);
        assert_eq!(
            record.web_url,
            "https://handbook.example.com/engineering/onboarding/"
        );
        assert_eq!(
            record.repo_url,
            "https://git.example.com/blob/cafe12/engineering/onboarding.md"
        );
        assert!(record.content_hash.starts_with("sha256:"));
        assert!(!record.embedding.is_empty());
        assert!(!record.updated_at.is_empty());
    }

    #[test]
    fn snippet_budget_truncates_stored_text_but_not_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        write_doc(&corpus, "long.md", 45);

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let mut cfg = config(&corpus);
        cfg.snippet_chars = 20;
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };
        run_ingest(&ctx).unwrap();

        let record = store.get("long#0").unwrap().unwrap();
        assert_eq!(record.chunk_text.chars().count(), 20);
        // The hash covers the full chunk text, so a resume run still
        // recognizes the chunk as unchanged.
        let again = CountingProvider::new();
        let ctx = IngestContext {
            store: &store,
            provider: &again,
            urls: &urls,
            config: &cfg,
        };
        run_ingest(&ctx).unwrap();
        assert_eq!(again.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn max_files_limits_processing() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        write_doc(&corpus, "a.md", 30);
        write_doc(&corpus, "b.md", 30);
        write_doc(&corpus, "c.md", 30);

        let store =
            RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
        let provider = CountingProvider::new();
        let urls = UrlResolver::new("https://w", "https://r", "sha");
        let mut cfg = config(&corpus);
        cfg.max_files = 2;
        let ctx = IngestContext {
            store: &store,
            provider: &provider,
            urls: &urls,
            config: &cfg,
        };

        let summary = run_ingest(&ctx).unwrap();
        assert_eq!(summary.files_seen, 2);
    }
}
