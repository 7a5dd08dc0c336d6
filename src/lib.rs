//! quern - resumable chunk-and-embed ingestion for markdown corpora.
//!
//! quern walks a tree of markdown documents, splits each into bounded
//! overlapping chunks, embeds the chunks through an OpenAI-compatible
//! provider, and persists chunk records (text, metadata, vector) into a
//! local [redb](https://github.com/cberner/redb)-backed store for
//! downstream semantic search. Content hashes make re-runs cheap: chunks
//! whose stored hash still matches are never re-embedded.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use quern::{DataDir, RedbChunkStore};
//! use quern::chunker::ChunkerConfig;
//! use quern::embedder::HttpEmbedder;
//! use quern::pipeline::{self, IngestContext, RunConfig};
//! use quern::urls::UrlResolver;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = RedbChunkStore::open(&data_dir.collection_db("handbook")).unwrap();
//! let provider = HttpEmbedder::new(
//!     "http://localhost:8080/v1",
//!     None,
//!     "intfloat/e5-base-v2",
//!     Duration::from_secs(60),
//!     3,
//! )
//! .unwrap();
//! let urls = UrlResolver::new(
//!     quern::urls::DEFAULT_BASE_WEB,
//!     quern::urls::DEFAULT_BASE_REPO,
//!     "main",
//! );
//!
//! let config = RunConfig {
//!     root: "/path/to/corpus".into(),
//!     collection: "handbook".into(),
//!     commit_sha: "main".into(),
//!     chunker: ChunkerConfig::default(),
//!     batch_size: pipeline::DEFAULT_BATCH_SIZE,
//!     resume: true,
//!     snippet_chars: pipeline::DEFAULT_SNIPPET_CHARS,
//!     max_files: 0,
//!     source: "gitlab-handbook".into(),
//!     access_groups: vec!["all".into()],
//!     tags: vec![],
//!     exclude: None,
//! };
//!
//! let ctx = IngestContext {
//!     store: &store,
//!     provider: &provider,
//!     urls: &urls,
//!     config: &config,
//! };
//! let summary = pipeline::run_ingest(&ctx).unwrap();
//! println!("embedded {} chunks", summary.chunks_embedded);
//! ```

pub mod chunker;
pub mod cli;
pub mod data_dir;
pub mod embedder;
pub mod error;
pub mod hash;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod resume;
pub mod search;
pub mod store;
pub mod urls;

pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use record::ChunkRecord;
pub use store::{ChunkStore, RedbChunkStore};
