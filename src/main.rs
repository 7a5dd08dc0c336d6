use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quern::{
    DataDir, RedbChunkStore,
    chunker::ChunkerConfig,
    cli::{Cli, Command, IngestArgs, QueryArgs, UrlKind, UrlsArgs},
    embedder::HttpEmbedder,
    error::{Error, Result},
    loader, pipeline,
    record::snippet,
    search,
    urls::UrlResolver,
};

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("QUERN_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&data_dir, &args),
        Command::Query(args) => cmd_query(&data_dir, &args),
        Command::Urls(args) => cmd_urls(&args),
        Command::Status(args) => cmd_status(&data_dir, args.json),
        Command::Completions(args) => {
            args.generate();
            Ok(())
        }
    }
}

fn build_exclude(patterns: &[String]) -> Result<Option<globset::GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid exclude pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude set: {e}")))?;
    Ok(Some(set))
}

fn cmd_ingest(data_dir: &DataDir, args: &IngestArgs) -> Result<()> {
    let config = pipeline::RunConfig {
        root: args.root.clone(),
        collection: args.collection.clone(),
        commit_sha: args.commit_sha.clone(),
        chunker: ChunkerConfig {
            max_tokens: args.max_tokens,
            overlap_tokens: args.overlap,
        },
        batch_size: args.batch_size,
        resume: !args.no_resume,
        snippet_chars: args.snippet_chars,
        max_files: args.max_files,
        source: args.source.clone(),
        access_groups: vec!["all".to_string()],
        tags: vec![],
        exclude: build_exclude(&args.exclude)?,
    };
    // Fail on bad parameters before touching the store or the provider.
    config.validate()?;

    let api_key = std::env::var("QUERN_API_KEY").ok();
    let provider = HttpEmbedder::new(
        &args.endpoint,
        api_key.as_deref(),
        &args.model,
        Duration::from_secs(args.timeout_secs),
        args.max_retries,
    )?;
    let store =
        RedbChunkStore::open(&data_dir.collection_db(&args.collection))?;
    let urls =
        UrlResolver::new(&args.base_web, &args.base_repo, &args.commit_sha);

    let ctx = pipeline::IngestContext {
        store: &store,
        provider: &provider,
        urls: &urls,
        config: &config,
    };
    let summary = pipeline::run_ingest(&ctx)?;

    println!(
        "[summary] files_seen={} skipped_short={} failed_load={} \
         chunks_total={} embedded_now={} skipped_existing={} \
         orphans_deleted={} failed_batches={} docs_failed={}",
        summary.files_seen,
        summary.files_skipped_short,
        summary.files_failed_load,
        summary.chunks_total,
        summary.chunks_embedded,
        summary.chunks_unchanged,
        summary.orphans_deleted,
        summary.failed_batches,
        summary.documents_failed,
    );
    if !summary.skipped_documents.is_empty() {
        eprintln!("Skipped documents:");
        for doc_id in &summary.skipped_documents {
            eprintln!("  {doc_id}");
        }
    }
    println!("[done] Ingest complete.");
    Ok(())
}

fn cmd_query(data_dir: &DataDir, args: &QueryArgs) -> Result<()> {
    let db_path = data_dir.collection_db(&args.collection);
    if !db_path.exists() {
        return Err(Error::NotFound {
            kind: "collection",
            name: args.collection.clone(),
        });
    }
    let store = RedbChunkStore::open(&db_path)?;

    let api_key = std::env::var("QUERN_API_KEY").ok();
    let provider = HttpEmbedder::new(
        &args.endpoint,
        api_key.as_deref(),
        &args.model,
        Duration::from_secs(args.timeout_secs),
        1,
    )?;

    // Pull a wider candidate set when stitching so adjacent chunks of the
    // displayed documents are available to merge.
    let fetch = if args.stitch { args.count * 8 } else { args.count };
    let hits =
        search::search(&store, &provider, &args.query, fetch, args.min_score)?;

    if args.stitch {
        let blocks = search::stitch_adjacent(&hits, args.max_per_doc);
        print_stitched(&blocks, args);
    } else {
        print_hits(&hits, args);
    }
    Ok(())
}

fn print_hits(hits: &[search::SearchHit], args: &QueryArgs) {
    if args.json {
        let rows: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "score": h.score,
                    "doc_key": h.record.doc_key,
                    "title": h.record.title,
                    "web_url": h.record.web_url,
                    "chunk_text": h.record.chunk_text,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(rows));
        return;
    }

    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "[{}] score={:.4} | {} # {}",
            i + 1,
            hit.score,
            hit.record.doc_id,
            hit.record.chunk_index
        );
        println!("     {} -> {}", hit.record.title, hit.record.web_url);
        let preview = snippet(&hit.record.chunk_text, 240).replace('\n', " ");
        println!("     {preview}");
    }
}

fn print_stitched(blocks: &[search::StitchedContext], args: &QueryArgs) {
    if args.json {
        let rows: Vec<serde_json::Value> = blocks
            .iter()
            .take(args.count)
            .map(|b| {
                serde_json::json!({
                    "score": b.score,
                    "doc_id": b.doc_id,
                    "start_index": b.start_index,
                    "end_index": b.end_index,
                    "title": b.title,
                    "web_url": b.web_url,
                    "context": b.context,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(rows));
        return;
    }

    if blocks.is_empty() {
        println!("No results.");
        return;
    }
    for (i, block) in blocks.iter().take(args.count).enumerate() {
        println!(
            "[{}] score~{:.4} | {} [{}:{}-{}]",
            i + 1,
            block.score,
            block.title,
            block.doc_id,
            block.start_index,
            block.end_index
        );
        println!("     {}", block.web_url);
        let preview = snippet(&block.context, 400).replace('\n', " ");
        println!("     {preview}");
    }
}

fn cmd_urls(args: &UrlsArgs) -> Result<()> {
    let docs = loader::discover_documents(&args.root, None)?;
    let resolver =
        UrlResolver::new(&args.base_web, &args.base_repo, &args.commit_sha);

    if args.json {
        let rows: Vec<serde_json::Value> = docs
            .iter()
            .map(|doc| {
                serde_json::json!({
                    "repo_path": doc.relative_path.to_string_lossy(),
                    "web_url": resolver.web_url(&doc.relative_path),
                    "repo_url": resolver.repo_url(&doc.relative_path),
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(rows));
    } else {
        for doc in &docs {
            match args.print {
                UrlKind::Web => {
                    println!("{}", resolver.web_url(&doc.relative_path));
                }
                UrlKind::Repo => {
                    println!("{}", resolver.repo_url(&doc.relative_path));
                }
                UrlKind::Both => {
                    println!(
                        "{}\t{}",
                        resolver.web_url(&doc.relative_path),
                        resolver.repo_url(&doc.relative_path)
                    );
                }
            }
        }
    }

    eprintln!("[summary] files_found={}", docs.len());
    Ok(())
}

fn cmd_status(data_dir: &DataDir, json: bool) -> Result<()> {
    let collections = data_dir.list_collections()?;

    let mut rows = Vec::new();
    for name in &collections {
        let store = RedbChunkStore::open(&data_dir.collection_db(name))?;
        rows.push((
            name.clone(),
            store.document_count()?,
            store.chunk_count()?,
        ));
    }

    if json {
        let values: Vec<serde_json::Value> = rows
            .iter()
            .map(|(name, docs, chunks)| {
                serde_json::json!({
                    "collection": name,
                    "documents": docs,
                    "chunks": chunks,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "data_dir": data_dir.root().to_string_lossy(),
                "collections": values,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        if rows.is_empty() {
            println!("No collections.");
        } else {
            for (name, docs, chunks) in &rows {
                println!("{name}\t{docs} documents\t{chunks} chunks");
            }
        }
    }
    Ok(())
}
