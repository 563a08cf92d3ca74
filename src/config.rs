//! Clustering pipeline configuration.
//!
//! Every algorithmic parameter is externally supplied: density clustering
//! hyperparameters, quality thresholds, evolution thresholds, retry policy,
//! and labeling policy. Loaded from `{data_path}/clustering.toml`, then the
//! `PODGRAPH_CLUSTERING` env var (JSON), then defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Minimum-cluster-size resolution strategy.
///
/// `Adaptive` scales with corpus size: `max(5, floor(sqrt(N) / 2))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MinClusterSize {
    Fixed { size: usize },
    Adaptive,
}

impl MinClusterSize {
    /// Resolve the minimum cluster size for a corpus of `n` units.
    pub fn resolve(&self, n: usize) -> usize {
        match self {
            MinClusterSize::Fixed { size } => *size,
            MinClusterSize::Adaptive => ((n as f64).sqrt() / 2.0).floor().max(5.0) as usize,
        }
    }
}

impl Default for MinClusterSize {
    fn default() -> Self {
        MinClusterSize::Adaptive
    }
}

/// Post-run quality thresholds. Violations only produce warnings — density
/// clustering parameter tuning requires human judgment, so there is no
/// automatic reparameterization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Warn when more than this fraction of units end up as outliers.
    pub max_outlier_ratio: f32,
    /// Warn when fewer clusters than this are detected.
    pub min_clusters: usize,
    /// Warn when any single cluster exceeds this many members.
    pub max_cluster_size: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_outlier_ratio: 0.4,
            min_clusters: 2,
            max_cluster_size: 200,
        }
    }
}

/// Thresholds for classifying cluster transitions between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionThresholds {
    /// A destination counts toward a split (and a source toward a merge)
    /// when it receives at least this fraction of the old cluster's units.
    pub split_threshold: f64,
    /// A single dominant destination counts as a continuation when it
    /// receives at least this fraction of the old cluster's units.
    pub continuation_threshold: f64,
}

impl Default for EvolutionThresholds {
    fn default() -> Self {
        Self {
            split_threshold: 0.2,
            continuation_threshold: 0.8,
        }
    }
}

/// Retry policy for graph store write sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            backoff_factor: 2.0,
            jitter: false,
        }
    }
}

/// Cluster labeling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// Word budget for generated labels.
    pub max_words: usize,
    /// Relaxed word budget used when resolving duplicate labels.
    pub widened_max_words: usize,
    /// How many representative member summaries go into the prompt.
    pub representatives: usize,
    /// LLM call attempts per cluster before falling back to a synthetic label.
    pub llm_attempts: u32,
    /// Base delay between LLM retries; attempt k sleeps `k * base`.
    pub llm_retry_base_ms: u64,
    /// Sampling temperature for label generation.
    pub temperature: f32,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            max_words: 3,
            widened_max_words: 5,
            representatives: 5,
            llm_attempts: 3,
            llm_retry_base_ms: 1000,
            temperature: 0.2,
        }
    }
}

/// Top-level clustering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Expected embedding dimension; units with any other length are dropped.
    pub expected_dimensions: usize,
    /// DBSCAN core-point neighbor count.
    pub min_samples: usize,
    /// Neighborhood radius as a cosine distance on unit vectors.
    pub density_radius: f32,
    /// Merge detected clusters whose centroids are within this cosine
    /// distance. 0.0 disables the merge pass.
    pub cluster_selection_epsilon: f32,
    pub min_cluster_size: MinClusterSize,
    pub quality: QualityThresholds,
    pub evolution: EvolutionThresholds,
    pub retry: RetryPolicy,
    pub labeling: LabelingConfig,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            expected_dimensions: 768,
            min_samples: 5,
            density_radius: 0.3,
            cluster_selection_epsilon: 0.0,
            min_cluster_size: MinClusterSize::default(),
            quality: QualityThresholds::default(),
            evolution: EvolutionThresholds::default(),
            retry: RetryPolicy::default(),
            labeling: LabelingConfig::default(),
        }
    }
}

/// Load clustering config with priority:
/// 1. `{data_path}/clustering.toml` file
/// 2. `PODGRAPH_CLUSTERING` env var (JSON)
/// 3. Defaults
pub fn load_clustering_config(data_path: &Path) -> ClusteringConfig {
    let config_path = data_path.join("clustering.toml");
    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<ClusteringConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded clustering config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!(
                        "Failed to parse {}: {}. Using default.",
                        config_path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read {}: {}. Using default.",
                    config_path.display(),
                    e
                );
            }
        }
    }

    if let Ok(json) = std::env::var("PODGRAPH_CLUSTERING") {
        match serde_json::from_str::<ClusteringConfig>(&json) {
            Ok(config) => {
                info!("Loaded clustering config from PODGRAPH_CLUSTERING env");
                return config;
            }
            Err(e) => {
                warn!("Failed to parse PODGRAPH_CLUSTERING: {}. Using default.", e);
            }
        }
    }

    ClusteringConfig::default()
}
