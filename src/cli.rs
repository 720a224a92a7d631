use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    embedding::DEFAULT_HASH_DIMENSION,
    fuzzy::DEFAULT_FUZZY_THRESHOLD,
    search::{DEFAULT_LIMIT, SearchMode},
};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Index documents and search them by meaning and by spelling"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding backend
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hash, global = true)]
    pub embedder: EmbedderKind,

    /// Vector dimension of the hash embedder
    #[arg(long, default_value_t = DEFAULT_HASH_DIMENSION, global = true)]
    pub dimension: usize,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Deterministic feature hashing, no model download
    Hash,
    /// Mean-pooled ColBERT token embeddings
    Colbert,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index files or directories, replacing earlier versions
    Index(IndexArgs),
    /// Search indexed documents
    Search(SearchArgs),
    /// Remove a document and its chunks from the index
    Delete(DeleteArgs),
    /// List indexed documents
    List(ListArgs),
    /// Show one document and optionally its chunks
    Show(ShowArgs),
    /// Suggest filename terms close to a query
    Suggest(SuggestArgs),
    /// Show index statistics
    Status(StatusArgs),
    /// Manage the ColBERT model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters carried over between chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub overlap: usize,

    /// Only index directory entries matching this glob (repeatable)
    #[arg(long)]
    pub glob: Vec<String>,

    /// Output per-file results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    pub count: usize,

    /// Retrieval mode
    #[arg(long, value_enum, default_value_t = SearchMode::Hybrid)]
    pub mode: SearchMode,

    /// Search only within this document (id or unique prefix)
    #[arg(short = 'd', long)]
    pub document: Option<String>,

    /// Search only chunks from this page
    #[arg(long)]
    pub page: Option<u32>,

    /// Minimum fuzzy score (0-100)
    #[arg(long, default_value_t = DEFAULT_FUZZY_THRESHOLD,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub threshold: u8,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Documents --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Document id or unique prefix
    pub document: String,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Document id or unique prefix
    pub document: String,

    /// Print every chunk
    #[arg(long)]
    pub chunks: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SuggestArgs {
    /// The misspelled query
    pub query: String,

    /// Maximum number of suggestions
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in the index settings
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
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
            "docsift",
            &mut std::io::stdout(),
        );
    }
}
