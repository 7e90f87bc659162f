//! Configuration loading for descriptor retrieval.
//!
//! Layered config: defaults -> user config file -> explicit config file ->
//! env vars -> CLI flags (applied by the caller).

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Upper bound on workers per stage. Larger requests are treated as a
/// configuration mistake rather than attempted.
pub const MAX_WORKERS: usize = 1024;

/// Upper bound on the progress reporting interval, in seconds (one day).
pub const MAX_PROGRESS_INTERVAL_SECS: f64 = 86_400.0;

/// Worker pool configuration for the classification pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSettings {
    /// Run operations with per-item panic isolation instead of letting a
    /// panic abort the whole run.
    #[serde(default)]
    pub use_isolation: bool,

    /// Workers resolving identifiers to descriptors (0 = one per CPU).
    #[serde(default)]
    pub extraction_workers: usize,

    /// Workers running the classifier (0 = one per CPU).
    #[serde(default)]
    pub classification_workers: usize,

    /// Extra in-flight items allowed per stage beyond the worker count.
    #[serde(default = "default_queue_slack")]
    pub queue_slack: usize,

    /// Abort the run on the first per-item failure.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_queue_slack() -> usize {
    2
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            use_isolation: false,
            extraction_workers: 0,
            classification_workers: 0,
            queue_slack: default_queue_slack(),
            fail_fast: false,
        }
    }
}

impl ParallelSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        for (name, workers) in [
            ("extraction_workers", self.extraction_workers),
            ("classification_workers", self.classification_workers),
        ] {
            if workers > MAX_WORKERS {
                return Err(format!(
                    "{name} must be <= {MAX_WORKERS}, got {workers}"
                ));
            }
        }
        Ok(())
    }
}

/// Nearest-neighbour index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Registered algorithm name ("flat", "lsh", "hnsw")
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Expected vector dimension (0 = take it from the first build batch)
    #[serde(default)]
    pub dimension: usize,

    /// Hash code length for the LSH index
    #[serde(default = "default_lsh_bits")]
    pub lsh_bits: usize,

    /// Seed for the LSH hyperplanes
    #[serde(default = "default_lsh_seed")]
    pub lsh_seed: u64,

    /// HNSW connections per layer (M)
    #[serde(default = "default_hnsw_connectivity")]
    pub hnsw_connectivity: usize,

    /// HNSW build-time search depth (ef_construction)
    #[serde(default = "default_hnsw_expansion_add")]
    pub hnsw_expansion_add: usize,

    /// HNSW query-time search depth (ef_search)
    #[serde(default = "default_hnsw_expansion_search")]
    pub hnsw_expansion_search: usize,

    /// Whether building an already-built index replaces its contents.
    /// When false a second build is rejected.
    #[serde(default = "default_true")]
    pub allow_rebuild: bool,

    /// Whether an update on an empty index acts as the initial build.
    #[serde(default)]
    pub allow_update_as_build: bool,

    /// Directory for persisted index files (algorithms that support it)
    #[serde(default)]
    pub index_path: Option<String>,
}

fn default_algorithm() -> String {
    "flat".to_string()
}

fn default_lsh_bits() -> usize {
    16
}

fn default_lsh_seed() -> u64 {
    42
}

fn default_hnsw_connectivity() -> usize {
    16
}

fn default_hnsw_expansion_add() -> usize {
    200
}

fn default_hnsw_expansion_search() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            dimension: 0,
            lsh_bits: default_lsh_bits(),
            lsh_seed: default_lsh_seed(),
            hnsw_connectivity: default_hnsw_connectivity(),
            hnsw_expansion_add: default_hnsw_expansion_add(),
            hnsw_expansion_search: default_hnsw_expansion_search(),
            allow_rebuild: true,
            allow_update_as_build: false,
            index_path: None,
        }
    }
}

impl IndexSettings {
    /// Settings for the given algorithm with all other values defaulted.
    pub fn for_algorithm(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.algorithm.trim().is_empty() {
            return Err("algorithm must not be empty".to_string());
        }
        if !(1..=64).contains(&self.lsh_bits) {
            return Err(format!("lsh_bits must be 1-64, got {}", self.lsh_bits));
        }
        if self.hnsw_connectivity == 0 {
            return Err("hnsw_connectivity must be > 0".to_string());
        }
        Ok(())
    }
}

/// Progress reporting cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSettings {
    /// Report every N consumed items (0 = only by time)
    #[serde(default)]
    pub every_items: u64,

    /// Report at most once per this many seconds (0 = only by count)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
}

fn default_interval_secs() -> f64 {
    1.0
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            every_items: 0,
            interval_secs: default_interval_secs(),
        }
    }
}

impl ProgressSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.interval_secs.is_finite() || self.interval_secs < 0.0 {
            return Err(format!(
                "interval_secs must be a non-negative number, got {}",
                self.interval_secs
            ));
        }
        if self.interval_secs > MAX_PROGRESS_INTERVAL_SECS {
            return Err(format!(
                "interval_secs must be at most {}, got {}",
                MAX_PROGRESS_INTERVAL_SECS, self.interval_secs
            ));
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Worker pools
    #[serde(default)]
    pub parallel: ParallelSettings,

    /// Nearest-neighbour index
    #[serde(default)]
    pub index: IndexSettings,

    /// Progress reporting
    #[serde(default)]
    pub progress: ProgressSettings,

    /// Recompute classifications that already exist in the cache
    #[serde(default)]
    pub classify_overwrite: bool,

    /// Directory of cached per-descriptor classifications
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel: ParallelSettings::default(),
            index: IndexSettings::default(),
            progress: ProgressSettings::default(),
            classify_overwrite: false,
            cache_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/descriptor-retrieval/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (RETRIEVAL_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, RetrievalError> {
        let config_dir = ProjectDirs::from("", "", "descriptor-retrieval")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| RetrievalError::Config(e.to_string()))?
            .set_default("index.algorithm", default_algorithm())
            .map_err(|e| RetrievalError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // RETRIEVAL_LOG_LEVEL, RETRIEVAL_PARALLEL__FAIL_FAST, ...
        builder = builder.add_source(
            Environment::with_prefix("RETRIEVAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        self.parallel
            .validate()
            .and_then(|_| self.index.validate())
            .and_then(|_| self.progress.validate())
            .map_err(RetrievalError::Config)
    }

    /// Cache directory as a path, if configured.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(PathBuf::from)
    }
}
