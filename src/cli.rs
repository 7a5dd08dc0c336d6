use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::{chunker, embedder, pipeline, urls};

#[derive(Debug, Parser)]
#[command(
    name = "quern",
    about = "Chunk, embed, and store markdown corpora for semantic search"
)]
pub struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a markdown corpus into a chunk collection
    Ingest(IngestArgs),
    /// Semantic query against a stored collection
    Query(QueryArgs),
    /// List web and repository URLs for a corpus
    Urls(UrlsArgs),
    /// Show collections and chunk counts
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Corpus root directory
    pub root: PathBuf,

    /// Target collection name
    #[arg(short = 'c', long, default_value = "handbook")]
    pub collection: String,

    /// Commit SHA recorded per chunk and used to build repo URLs
    #[arg(long)]
    pub commit_sha: String,

    /// Embedding model identifier
    #[arg(long, default_value = "intfloat/e5-base-v2")]
    pub model: String,

    /// OpenAI-compatible embeddings endpoint base URL
    #[arg(long, default_value = "http://localhost:8080/v1")]
    pub endpoint: String,

    /// Maximum approximate tokens per chunk
    #[arg(long, default_value_t = chunker::DEFAULT_MAX_TOKENS)]
    pub max_tokens: usize,

    /// Approximate token overlap between adjacent chunks
    #[arg(long, default_value_t = chunker::DEFAULT_OVERLAP_TOKENS)]
    pub overlap: usize,

    /// Texts per embedding request
    #[arg(long, default_value_t = pipeline::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Re-embed every chunk even when the stored hash matches
    #[arg(long)]
    pub no_resume: bool,

    /// Keep only the first N chars of stored chunk text (0 = unlimited)
    #[arg(long, default_value_t = pipeline::DEFAULT_SNIPPET_CHARS)]
    pub snippet_chars: usize,

    /// Process at most this many files (0 = all)
    #[arg(long, default_value_t = 0)]
    pub max_files: usize,

    /// Source identifier stored per chunk
    #[arg(long, default_value = "gitlab-handbook")]
    pub source: String,

    /// Base URL of the rendered site
    #[arg(long, default_value = urls::DEFAULT_BASE_WEB)]
    pub base_web: String,

    /// Base blob URL of the source repository
    #[arg(long, default_value = urls::DEFAULT_BASE_REPO)]
    pub base_repo: String,

    /// Skip relative paths matching this glob (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Request timeout in seconds for provider calls
    #[arg(long, default_value_t = embedder::DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Provider retry budget per batch
    #[arg(long, default_value_t = embedder::DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The search query
    pub query: String,

    /// Collection to search
    #[arg(short = 'c', long, default_value = "handbook")]
    pub collection: String,

    /// Number of results to display
    #[arg(short = 'n', long, default_value = "6")]
    pub count: usize,

    /// Minimum score threshold
    #[arg(long, default_value = "0.0")]
    pub min_score: f32,

    /// Stitch runs of adjacent chunks into context blocks
    #[arg(long)]
    pub stitch: bool,

    /// Maximum stitched blocks per document
    #[arg(long, default_value = "2")]
    pub max_per_doc: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Embedding model identifier (must match the ingested collection)
    #[arg(long, default_value = "intfloat/e5-base-v2")]
    pub model: String,

    /// OpenAI-compatible embeddings endpoint base URL
    #[arg(long, default_value = "http://localhost:8080/v1")]
    pub endpoint: String,

    /// Request timeout in seconds for provider calls
    #[arg(long, default_value_t = embedder::DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

// -- Urls --

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UrlKind {
    Web,
    Repo,
    Both,
}

#[derive(Debug, Parser)]
pub struct UrlsArgs {
    /// Corpus root directory
    pub root: PathBuf,

    /// Commit SHA used for repo blob URLs
    #[arg(long)]
    pub commit_sha: String,

    /// Base URL of the rendered site
    #[arg(long, default_value = urls::DEFAULT_BASE_WEB)]
    pub base_web: String,

    /// Base blob URL of the source repository
    #[arg(long, default_value = urls::DEFAULT_BASE_REPO)]
    pub base_repo: String,

    /// Which URLs to print
    #[arg(long, value_enum, default_value_t = UrlKind::Web)]
    pub print: UrlKind,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "quern",
            &mut std::io::stdout(),
        );
    }
}
