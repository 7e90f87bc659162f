//! Command implementations for the retrieval-classify binary.
//!
//! `classify` runs a two-stage pipeline:
//! 1. identifiers -> descriptors (extraction workers)
//! 2. descriptors -> classifications (classification workers)
//!
//! Results are written as they arrive, in input order. Per-item failures are
//! logged and counted; the run continues unless fail-fast is configured.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use retrieval_index::{IndexRegistry, LifecycleIndex, Neighbor};
use retrieval_pipeline::{
    ExecutionModel, FailurePolicy, LoggingProgressSink, Pipeline, PipelineError, ProgressPolicy,
    ProgressReporter, ProgressSnapshot, StageConfig,
};
use retrieval_types::{Descriptor, DescriptorId, ParallelSettings, RetrievalError, Settings};
use tracing::{info, warn};

use crate::cache::{CachingClassifier, ClassificationCache};
use crate::classifier::{read_labelled, CentroidClassifier, Classifier, NeighborVoteClassifier};
use crate::cli::{BuildIndexArgs, ClassifierKind, ClassifyArgs};
use crate::resolver::{DescriptorResolver, JsonLinesDescriptorStore};
use crate::sink::{write_header_file, CsvResultSink};

/// Load settings and apply the global CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Apply `classify` flags on top of loaded settings.
pub fn apply_classify_overrides(settings: &mut Settings, args: &ClassifyArgs) {
    let parallel = &mut settings.parallel;
    if let Some(workers) = args.extraction_workers {
        parallel.extraction_workers = workers;
    }
    if let Some(workers) = args.classification_workers {
        parallel.classification_workers = workers;
    }
    parallel.fail_fast |= args.fail_fast;
    parallel.use_isolation |= args.isolated;
    settings.classify_overwrite |= args.overwrite;
    if let Some(dir) = &args.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    if let Some(every) = args.progress_every {
        settings.progress.every_items = every;
    }
}

/// Outcome of a `classify` run.
#[derive(Debug, Clone)]
pub struct ClassifyReport {
    /// Final progress counters
    pub snapshot: ProgressSnapshot,
    /// Rows written to the data file
    pub rows: u64,
    /// Messages of the per-item failures, in input order
    pub failures: Vec<String>,
}

fn stage_config(name: &str, workers: usize, parallel: &ParallelSettings) -> StageConfig {
    StageConfig::new(name)
        .with_workers(workers)
        .with_queue_slack(parallel.queue_slack)
        .with_execution(ExecutionModel::from_isolation(parallel.use_isolation))
        .with_failure_policy(FailurePolicy::from_fail_fast(parallel.fail_fast))
}

/// Lazily read identifiers, one per line. Blank lines are skipped.
pub fn read_identifiers(
    path: &Path,
) -> Result<impl Iterator<Item = Result<DescriptorId, PipelineError>> + Send + 'static> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open identifier list {}", path.display()))?;
    Ok(BufReader::new(file).lines().filter_map(|line| match line {
        Ok(line) => {
            let id = line.trim();
            (!id.is_empty()).then(|| Ok(DescriptorId::from(id)))
        }
        Err(e) => Some(Err(PipelineError::from(RetrievalError::Io(e)))),
    }))
}

fn count_identifiers(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn build_classifier(settings: &Settings, args: &ClassifyArgs) -> Result<Arc<dyn Classifier>> {
    let classifier: Arc<dyn Classifier> = match args.classifier {
        ClassifierKind::Centroid => Arc::new(
            CentroidClassifier::load(&args.model)
                .with_context(|| format!("Failed to load model {}", args.model.display()))?,
        ),
        ClassifierKind::Knn => {
            let examples = read_labelled(&args.model).with_context(|| {
                format!("Failed to read labelled examples {}", args.model.display())
            })?;
            let index = IndexRegistry::with_defaults().create_lifecycle(&settings.index)?;
            Arc::new(NeighborVoteClassifier::new(index, examples, args.neighbors)?)
        }
    };

    match settings.cache_path() {
        Some(dir) => {
            let cache = ClassificationCache::open(&dir)
                .with_context(|| format!("Failed to open cache {}", dir.display()))?;
            info!(
                cache = %dir.display(),
                overwrite = settings.classify_overwrite,
                "Caching classifications"
            );
            Ok(Arc::new(CachingClassifier::new(
                classifier,
                cache,
                settings.classify_overwrite,
            )))
        }
        None => Ok(classifier),
    }
}

/// Classify every identifier in `args.uuids` and write the CSV outputs.
///
/// Fails before any work when an input file is missing or a stage cannot be
/// started. With fail-fast the run stops at the first failed item and the
/// rows written so far are kept.
pub fn run_classify(settings: &Settings, args: &ClassifyArgs) -> Result<ClassifyReport> {
    if !args.uuids.is_file() {
        bail!("Identifier list is not a file: {}", args.uuids.display());
    }

    let store = JsonLinesDescriptorStore::open(&args.descriptors)
        .with_context(|| format!("Failed to load descriptors {}", args.descriptors.display()))?;
    let resolver: Arc<dyn DescriptorResolver> = Arc::new(store);
    let classifier = build_classifier(settings, args)?;
    let labels = classifier.labels().to_vec();

    write_header_file(&args.header_out, &labels)
        .with_context(|| format!("Failed to write header {}", args.header_out.display()))?;
    let mut sink = CsvResultSink::create(&args.out, labels)
        .with_context(|| format!("Failed to create output {}", args.out.display()))?;

    let total = count_identifiers(&args.uuids)?;
    let parallel = &settings.parallel;
    info!(
        total,
        extraction_workers = parallel.extraction_workers,
        classification_workers = parallel.classification_workers,
        isolated = parallel.use_isolation,
        fail_fast = parallel.fail_fast,
        "Starting classification"
    );

    let stage_classifier = Arc::clone(&classifier);
    let pipeline = Pipeline::from_results(read_identifiers(&args.uuids)?)
        .stage(
            stage_config("extract", parallel.extraction_workers, parallel),
            move |id: DescriptorId| Ok(resolver.resolve(&id)?),
        )?
        .stage(
            stage_config("classify", parallel.classification_workers, parallel),
            move |descriptor: Descriptor| Ok(stage_classifier.classify(&descriptor)?),
        )?;

    let reporter = ProgressReporter::new(
        LoggingProgressSink::new("classify"),
        ProgressPolicy::from(&settings.progress),
    )
    .with_total(total);
    let mut tracked = reporter.track(pipeline);

    let mut failures = Vec::new();
    for result in tracked.by_ref() {
        match result {
            Ok(classification) => sink.write(&classification)?,
            Err(e) if e.is_item_failure() => {
                warn!(error = %e, "Item failed");
                failures.push(e.to_string());
            }
            Err(e) => return Err(e).context("Pipeline stopped"),
        }
    }

    let (_, rows) = sink.finish()?;
    let snapshot = tracked.into_reporter().finish();
    info!(
        rows,
        failed = snapshot.failed,
        elapsed_secs = snapshot.elapsed.as_secs_f64(),
        "Classification complete"
    );

    if parallel.fail_fast {
        if let Some(first) = failures.first() {
            bail!("Stopped at first failure: {}", first);
        }
    }

    Ok(ClassifyReport {
        snapshot,
        rows,
        failures,
    })
}

/// Outcome of a `build-index` run.
#[derive(Debug, Clone)]
pub struct BuildIndexReport {
    pub algorithm: String,
    pub count: usize,
    pub neighbors: Vec<Neighbor>,
}

fn load_entries(path: &Path) -> Result<JsonLinesDescriptorStore> {
    JsonLinesDescriptorStore::open(path)
        .with_context(|| format!("Failed to load descriptors {}", path.display()))
}

/// Build an index from `args.descriptors`, apply each update batch, and
/// optionally query it with one of the indexed descriptors.
pub fn run_build_index(settings: &Settings, args: &BuildIndexArgs) -> Result<BuildIndexReport> {
    let mut index_settings = settings.index.clone();
    if let Some(algorithm) = &args.algorithm {
        index_settings.algorithm = algorithm.clone();
    }
    if let Some(path) = &args.index_path {
        index_settings.index_path = Some(path.clone());
    }

    let mut index: LifecycleIndex = IndexRegistry::with_defaults()
        .create_lifecycle(&index_settings)
        .context("Failed to create index")?;

    let base = load_entries(&args.descriptors)?;
    index.build_index(base.entries()).context("Build failed")?;

    let mut stores = vec![base];
    for path in &args.update {
        let batch = load_entries(path)?;
        index
            .update_index(batch.entries())
            .with_context(|| format!("Update from {} failed", path.display()))?;
        stores.push(batch);
    }
    info!(
        algorithm = index.algorithm(),
        count = index.count(),
        state = ?index.state(),
        "Index ready"
    );

    let neighbors = match &args.query {
        Some(query) => {
            let id = DescriptorId::from(query.as_str());
            // Later batches replace earlier vectors for the same id.
            let descriptor = stores
                .iter()
                .rev()
                .find_map(|store| store.resolve(&id).ok())
                .with_context(|| format!("Query descriptor '{}' not found", id))?;
            let neighbors = index.query(&descriptor.vector, args.n)?;
            for neighbor in &neighbors {
                println!("{}\t{:.6}", neighbor.id, neighbor.distance);
            }
            neighbors
        }
        None => Vec::new(),
    };

    index.save().context("Failed to save index")?;

    Ok(BuildIndexReport {
        algorithm: index.algorithm().to_string(),
        count: index.count(),
        neighbors,
    })
}
