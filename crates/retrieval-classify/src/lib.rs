//! Batch descriptor classification.
//!
//! Library side of the `retrieval-classify` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (classify, build-index)
//! - `resolver`: Identifier to descriptor resolution
//! - `classifier`: Centroid and neighbour-vote classifiers
//! - `cache`: Per-descriptor classification cache
//! - `sink`: CSV header and data output

pub mod cache;
pub mod classifier;
pub mod cli;
pub mod commands;
pub mod resolver;
pub mod sink;

pub use cache::{CachingClassifier, ClassificationCache};
pub use classifier::{
    read_labelled, CentroidClassifier, CentroidModel, Classifier, LabelCentroid,
    NeighborVoteClassifier,
};
pub use cli::{BuildIndexArgs, ClassifierKind, ClassifyArgs, Cli, Commands};
pub use commands::{
    apply_classify_overrides, init_logging, load_settings, run_build_index, run_classify,
    BuildIndexReport, ClassifyReport,
};
pub use resolver::{DescriptorResolver, JsonLinesDescriptorStore};
pub use sink::{write_header_file, CsvResultSink};
