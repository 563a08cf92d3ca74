//! Full clustering pipeline orchestration.
//!
//! Runs extract -> cluster -> label -> persist -> evolution as a single
//! invocation and folds the outcome into a serializable report. The previous
//! generation's assignments are snapshotted *before* persistence archives
//! them; loading them afterwards would diff against already-replaced state
//! and silently report nothing.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::GenerationMode;
use crate::services::clustering::DensityClusterer;
use crate::services::embedding_source::EmbeddingSource;
use crate::services::evolution::{self, EvolutionReport, EvolutionTracker};
use crate::services::labeling::{ClusterLabeler, LabelStats};
use crate::services::persistence::GraphPersistence;
use crate::PodgraphError;

/// Outcome status of a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Error,
}

/// Statistics for one successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub run_id: String,
    pub total_units: usize,
    pub n_clusters: usize,
    pub n_outliers: usize,
    pub outlier_ratio: f64,
    pub min_cluster_size: usize,
    pub avg_cluster_size: f64,
    pub max_cluster_size: usize,
    pub archived_clusters: usize,
    pub labels: LabelStats,
    pub evolution: Option<EvolutionReport>,
    pub elapsed_seconds: f64,
    pub units_per_second: f64,
}

/// Serializable result of one pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub message: String,
    pub stats: Option<RunStats>,
    /// Non-fatal problems encountered along the way.
    pub errors: Vec<String>,
}

impl PipelineOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Error,
            message: message.into(),
            stats: None,
            errors: Vec::new(),
        }
    }
}

/// End-to-end clustering pipeline.
pub struct ClusteringPipeline {
    source: Arc<dyn EmbeddingSource>,
    clusterer: DensityClusterer,
    labeler: ClusterLabeler,
    persistence: GraphPersistence,
    tracker: EvolutionTracker,
}

impl ClusteringPipeline {
    pub fn new(
        source: Arc<dyn EmbeddingSource>,
        clusterer: DensityClusterer,
        labeler: ClusterLabeler,
        persistence: GraphPersistence,
        tracker: EvolutionTracker,
    ) -> Self {
        Self {
            source,
            clusterer,
            labeler,
            persistence,
            tracker,
        }
    }

    /// Run a current-mode clustering pass over all units.
    pub async fn run_current(&mut self) -> PipelineOutcome {
        self.run(GenerationMode::Current, None).await
    }

    /// Run a snapshot clustering pass for one historical period.
    pub async fn run_snapshot(&mut self, period: &str) -> PipelineOutcome {
        self.run(GenerationMode::Snapshot, Some(period)).await
    }

    async fn run(&mut self, mode: GenerationMode, period: Option<&str>) -> PipelineOutcome {
        let started = Instant::now();
        let mut errors = Vec::new();

        info!(
            "Starting {} clustering run{}",
            mode.as_str(),
            period.map(|p| format!(" for period {}", p)).unwrap_or_default()
        );

        let extraction = match self.source.extract_all().await {
            Ok(extraction) => extraction,
            Err(e) => {
                error!("Embedding extraction failed: {}", e);
                return PipelineOutcome::failed(format!("embedding extraction failed: {}", e));
            }
        };
        if extraction.is_empty() {
            warn!("No embedded units found; nothing to cluster");
            return PipelineOutcome::failed("no embedded units available for clustering");
        }
        info!("Extracted {} embedded unit(s)", extraction.len());

        let result = match self.clusterer.cluster(&extraction) {
            Ok(result) => result,
            Err(e) => {
                error!("Clustering failed: {}", e);
                return PipelineOutcome::failed(format!("clustering failed: {}", e));
            }
        };
        info!(
            "Detected {} cluster(s), {} outlier(s) ({:.1}% outlier ratio)",
            result.n_clusters(),
            result.n_outliers(),
            result.outlier_ratio() * 100.0
        );

        let labels = self.labeler.generate_labels(&result, &extraction).await;
        let label_stats = self.labeler.take_stats();
        if label_stats.fallbacks > 0 {
            errors.push(format!(
                "{} cluster(s) received synthetic fallback labels",
                label_stats.fallbacks
            ));
        }

        // snapshot baseline before persistence rewrites the live generation
        let previous = if mode == GenerationMode::Current {
            match self.tracker.load_previous().await {
                Ok(previous) => previous,
                Err(e) => {
                    warn!("Could not load previous generation: {}", e);
                    errors.push(format!("evolution baseline unavailable: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let persist_stats = match self
            .persistence
            .update_graph(&result, &labels, mode, period)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                error!("Graph persistence failed: {}", e);
                return PipelineOutcome::failed(format!("graph persistence failed: {}", e));
            }
        };

        let evolution = match previous {
            Some(previous) if !previous.assignments.is_empty() => {
                let current_assignments = evolution::assignment_map(&result, mode, period);
                let report = self
                    .tracker
                    .track(
                        &previous,
                        &current_assignments,
                        &persist_stats.cluster_refs,
                        None,
                        None,
                    )
                    .await;
                if report.edges_failed > 0 {
                    errors.push(format!(
                        "{} evolution edge(s) failed to persist",
                        report.edges_failed
                    ));
                }
                Some(report)
            }
            _ => None,
        };

        let elapsed = started.elapsed().as_secs_f64();
        let (min_size, avg_size, max_size) = result.size_stats();
        let stats = RunStats {
            run_id: persist_stats.run_id.clone(),
            total_units: result.total_units,
            n_clusters: result.n_clusters(),
            n_outliers: result.n_outliers(),
            outlier_ratio: result.outlier_ratio(),
            min_cluster_size: min_size,
            avg_cluster_size: avg_size,
            max_cluster_size: max_size,
            archived_clusters: persist_stats.archived_clusters,
            labels: label_stats,
            evolution,
            elapsed_seconds: elapsed,
            units_per_second: if elapsed > 0.0 {
                result.total_units as f64 / elapsed
            } else {
                0.0
            },
        };

        info!(
            "Run {} finished in {:.2}s ({:.0} units/s)",
            stats.run_id, stats.elapsed_seconds, stats.units_per_second
        );

        PipelineOutcome {
            status: PipelineStatus::Success,
            message: format!(
                "clustered {} unit(s) into {} cluster(s)",
                stats.total_units, stats.n_clusters
            ),
            stats: Some(stats),
            errors,
        }
    }

    /// Compare two persisted snapshot generations.
    pub async fn compare_snapshots(
        &self,
        from_period: &str,
        to_period: &str,
    ) -> Result<EvolutionReport, PodgraphError> {
        self.tracker.compare_snapshots(from_period, to_period).await
    }
}
