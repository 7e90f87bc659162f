//! CLI argument parsing for retrieval-classify.
//!
//! CLI flags override all other config sources.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Batch descriptor classification
///
/// Resolves identifiers to descriptors, classifies them with a worker pool
/// per stage and writes the results as CSV in input order.
#[derive(Parser, Debug)]
#[command(name = "retrieval-classify")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/descriptor-retrieval/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify every identifier in a list and write CSV results
    Classify(ClassifyArgs),

    /// Build (and optionally update and query) a nearest-neighbour index
    BuildIndex(BuildIndexArgs),
}

/// Classifier implementation used by `classify`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierKind {
    /// Nearest centroid; `--model` is a JSON centroid model
    #[default]
    Centroid,
    /// Neighbour vote; `--model` is a JSON-lines file of labelled descriptors
    Knn,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// File with one descriptor identifier per line
    #[arg(long)]
    pub uuids: PathBuf,

    /// JSON-lines descriptor store ({"id": ..., "vector": [...]})
    #[arg(long)]
    pub descriptors: PathBuf,

    /// Classifier model file
    #[arg(long)]
    pub model: PathBuf,

    /// Classifier implementation
    #[arg(long, value_enum, default_value_t = ClassifierKind::Centroid)]
    pub classifier: ClassifierKind,

    /// Neighbours consulted by the knn classifier
    #[arg(long, default_value = "5")]
    pub neighbors: usize,

    /// Output file for the CSV header row
    #[arg(long)]
    pub header_out: PathBuf,

    /// Output file for the CSV data rows
    #[arg(long)]
    pub out: PathBuf,

    /// Directory of cached classifications
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Recompute classifications that are already cached
    #[arg(long)]
    pub overwrite: bool,

    /// Stop at the first per-item failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Isolate each item so a panicking operation fails only that item
    #[arg(long)]
    pub isolated: bool,

    /// Workers resolving descriptors (0 = one per CPU)
    #[arg(long)]
    pub extraction_workers: Option<usize>,

    /// Workers running the classifier (0 = one per CPU)
    #[arg(long)]
    pub classification_workers: Option<usize>,

    /// Report progress every N items
    #[arg(long)]
    pub progress_every: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildIndexArgs {
    /// JSON-lines descriptors for the initial build
    #[arg(long)]
    pub descriptors: PathBuf,

    /// Additional JSON-lines batches applied as updates, in order
    #[arg(long)]
    pub update: Vec<PathBuf>,

    /// Index algorithm (flat, lsh, hnsw)
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Directory to persist the index in (hnsw only)
    #[arg(long)]
    pub index_path: Option<String>,

    /// Identifier of an indexed descriptor to use as a query
    #[arg(long)]
    pub query: Option<String>,

    /// Number of neighbours to return for `--query`
    #[arg(short, default_value = "10")]
    pub n: usize,
}
