//! Batch descriptor classification CLI
//!
//! # Usage
//!
//! ```bash
//! retrieval-classify classify --uuids ids.txt --descriptors d.jsonl --model m.json \
//!     --header-out header.csv --out data.csv
//! retrieval-classify build-index --descriptors d.jsonl [--update more.jsonl] [--query ID -n 10]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/descriptor-retrieval/config.toml)
//! 3. Environment variables (RETRIEVAL_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use retrieval_classify::{
    apply_classify_overrides, init_logging, load_settings, run_build_index, run_classify, Cli,
    Commands,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;

    match cli.command {
        Commands::Classify(args) => {
            apply_classify_overrides(&mut settings, &args);
            init_logging(&settings.log_level)?;
            let report = run_classify(&settings, &args)?;
            println!(
                "Classified {} of {} items ({} failed) in {:.2}s",
                report.rows,
                report.snapshot.processed,
                report.snapshot.failed,
                report.snapshot.elapsed.as_secs_f64()
            );
        }
        Commands::BuildIndex(args) => {
            init_logging(&settings.log_level)?;
            let report = run_build_index(&settings, &args)?;
            println!(
                "Index '{}' holds {} descriptors",
                report.algorithm, report.count
            );
        }
    }

    Ok(())
}
