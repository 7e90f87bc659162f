use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use e2e_tests::{lifecycle, random_descriptors};
use retrieval_classify::{DescriptorResolver, JsonLinesDescriptorStore};
use retrieval_pipeline::{Pipeline, PipelineError, StageConfig};
use retrieval_types::{Descriptor, DescriptorId, RetrievalError};

const DEFAULT_ITERATIONS: usize = 3;
const DIMENSION: usize = 32;

#[derive(Parser, Debug)]
#[command(
    name = "perf_bench",
    about = "Descriptor retrieval pipeline benchmark harness"
)]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value = "flat")]
    algorithm: String,
    #[arg(long, value_delimiter = ',', default_value = "1,2,4,8")]
    workers: Vec<usize>,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn sizes(&self) -> (usize, usize) {
        match self {
            DatasetTier::Small => (2_000, 5_000),
            DatasetTier::Medium => (20_000, 50_000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMetrics {
    p50_ips: f64,
    best_ips: f64,
    samples: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    algorithm: String,
    iterations: usize,
    build_ms: f64,
    steps: BTreeMap<String, StepMetrics>,
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() - 1) as f64 * pct).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    let (corpus_size, query_count) = args.tier.sizes();

    let corpus = random_descriptors(corpus_size, DIMENSION, 1);
    let mut index = lifecycle(&args.algorithm).map_err(|e| e.to_string())?;
    let build_start = Instant::now();
    index
        .build_index(corpus.iter().cloned().map(Descriptor::into_entry))
        .map_err(|e| format!("Build failed: {e}"))?;
    let build_ms = build_start.elapsed().as_secs_f64() * 1000.0;
    let index = Arc::new(index);

    let queries = random_descriptors(query_count, DIMENSION, 2);
    let ids: Vec<DescriptorId> = queries.iter().map(|d| d.id.clone()).collect();
    let store: Arc<dyn DescriptorResolver> =
        Arc::new(JsonLinesDescriptorStore::from_descriptors(queries));

    let mut steps = BTreeMap::new();
    for &workers in &args.workers {
        let mut samples = Vec::with_capacity(args.iterations);
        for _ in 0..args.iterations {
            let store = Arc::clone(&store);
            let index = Arc::clone(&index);
            let start = Instant::now();
            let completed = Pipeline::new(ids.clone())
                .stage(
                    StageConfig::new("extract").with_workers(workers),
                    move |id: DescriptorId| Ok(store.resolve(&id)?),
                )
                .and_then(|p| {
                    p.stage(
                        StageConfig::new("query").with_workers(workers),
                        move |d: Descriptor| {
                            index
                                .query(&d.vector, 10)
                                .map_err(|e| PipelineError::from(RetrievalError::from(e)))
                        },
                    )
                })
                .map_err(|e| e.to_string())?
                .filter(Result::is_ok)
                .count();
            let secs = start.elapsed().as_secs_f64();
            samples.push(completed as f64 / secs.max(f64::EPSILON));
        }
        samples.sort_by(f64::total_cmp);
        let metrics = StepMetrics {
            p50_ips: percentile(&samples, 0.5),
            best_ips: samples.last().copied().unwrap_or(0.0),
            samples: samples.len(),
        };
        println!(
            "workers={workers:<3} p50={:>10.1} items/s best={:>10.1} items/s",
            metrics.p50_ips, metrics.best_ips
        );
        steps.insert(format!("workers_{workers}"), metrics);
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        algorithm: args.algorithm,
        iterations: args.iterations,
        build_ms,
        steps,
    };
    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    match args.out {
        Some(path) => {
            fs::write(&path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))?
        }
        None => println!("{json}"),
    }
    Ok(())
}
