//! End-to-end pipeline flow over in-memory stores.
//!
//! Exercises extract -> cluster -> label -> persist -> evolution without a
//! database: one shared in-memory graph implements the persistence and
//! evolution store seams, and embeddings come from a synthetic two-blob
//! fixture.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use podgraph::config::{ClusteringConfig, LabelingConfig, MinClusterSize, RetryPolicy};
use podgraph::generation::DisabledTextGenerator;
use podgraph::models::{GenerationMode, RunPhase};
use podgraph::services::clustering::DensityClusterer;
use podgraph::services::embedding_source::{EmbeddingExtraction, EmbeddingSource};
use podgraph::services::evolution::{EvolutionStore, EvolutionTracker, PreviousGeneration};
use podgraph::services::labeling::ClusterLabeler;
use podgraph::services::persistence::{ClusterStore, GraphPersistence, NewCluster, RunSummary};
use podgraph::services::pipeline::{ClusteringPipeline, PipelineStatus};
use podgraph::PodgraphError;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Two well-separated blobs of 10 units each, plus 2 isolated outliers.
struct BlobSource;

fn blob_vector(axis: usize, jitter_seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 8];
    v[axis] = 1.0;
    // small deterministic perturbation, well inside the density radius
    v[(axis + 1) % 8] = 0.01 * ((jitter_seed % 7) as f32);
    v[(axis + 2) % 8] = 0.01 * ((jitter_seed % 5) as f32);
    v
}

#[async_trait]
impl EmbeddingSource for BlobSource {
    async fn extract_all(&self) -> Result<EmbeddingExtraction, PodgraphError> {
        let mut extraction = EmbeddingExtraction::default();
        for i in 0..10 {
            extraction.unit_ids.push(format!("meaningful_unit:a{}", i));
            extraction.embeddings.push(blob_vector(0, i));
            extraction.summaries.push(format!("AI safety excerpt {}", i));
        }
        for i in 0..10 {
            extraction.unit_ids.push(format!("meaningful_unit:b{}", i));
            extraction.embeddings.push(blob_vector(4, i));
            extraction
                .summaries
                .push(format!("Gut health excerpt {}", i));
        }
        for (i, axis) in [2usize, 6].iter().enumerate() {
            extraction.unit_ids.push(format!("meaningful_unit:x{}", i));
            extraction.embeddings.push(blob_vector(*axis, 0));
            extraction.summaries.push("stray excerpt".to_string());
        }
        Ok(extraction)
    }

    async fn extract_for_episode(
        &self,
        _episode_id: &str,
    ) -> Result<EmbeddingExtraction, PodgraphError> {
        self.extract_all().await
    }
}

#[derive(Clone)]
struct StoredCluster {
    record_ref: String,
    cluster_key: String,
    mode: GenerationMode,
    period: Option<String>,
    run_id: String,
    active: bool,
}

#[derive(Default)]
struct GraphState {
    clusters: Vec<StoredCluster>,
    /// (unit id, cluster ref, is_primary)
    memberships: Vec<(String, String, bool)>,
    /// (from ref, to ref, kind)
    edges: Vec<(String, String, String)>,
    complete_current_runs: Vec<String>,
    next_ref: usize,
}

/// Shared in-memory stand-in for the SurrealDB graph.
#[derive(Default)]
struct InMemoryGraph {
    state: Mutex<GraphState>,
}

impl InMemoryGraph {
    fn generation_for_run(&self, run_id: &str) -> PreviousGeneration {
        let state = self.state.lock().unwrap();
        let clusters: Vec<&StoredCluster> = state
            .clusters
            .iter()
            .filter(|c| c.run_id == run_id)
            .collect();
        let mut generation = PreviousGeneration {
            run_id: run_id.to_string(),
            ..PreviousGeneration::default()
        };
        for cluster in &clusters {
            generation
                .cluster_refs
                .insert(cluster.cluster_key.clone(), cluster.record_ref.clone());
            for (unit, cluster_ref, _) in &state.memberships {
                if *cluster_ref == cluster.record_ref {
                    generation
                        .assignments
                        .insert(unit.clone(), cluster.cluster_key.clone());
                }
            }
        }
        generation
    }
}

#[async_trait]
impl ClusterStore for InMemoryGraph {
    async fn create_run_record(&self, summary: &RunSummary) -> Result<String, PodgraphError> {
        Ok(format!("clustering_state:{}", summary.run_id))
    }

    async fn set_run_phase(&self, run_id: &str, phase: RunPhase) -> Result<(), PodgraphError> {
        if phase == RunPhase::Complete {
            let mut state = self.state.lock().unwrap();
            let is_current = state
                .clusters
                .iter()
                .any(|c| c.run_id == run_id && c.mode == GenerationMode::Current);
            if is_current {
                state.complete_current_runs.push(run_id.to_string());
            }
        }
        Ok(())
    }

    async fn archive_current_generation(&self) -> Result<(usize, usize), PodgraphError> {
        let mut state = self.state.lock().unwrap();
        let mut archived = 0;
        for cluster in &mut state.clusters {
            if cluster.mode == GenerationMode::Current && cluster.active {
                cluster.active = false;
                archived += 1;
            }
        }
        let mut demoted = 0;
        for membership in &mut state.memberships {
            if membership.2 {
                membership.2 = false;
                demoted += 1;
            }
        }
        Ok((archived, demoted))
    }

    async fn create_cluster(&self, data: &NewCluster) -> Result<String, PodgraphError> {
        let mut state = self.state.lock().unwrap();
        state.next_ref += 1;
        let record_ref = format!("cluster:c{}", state.next_ref);
        state.clusters.push(StoredCluster {
            record_ref: record_ref.clone(),
            cluster_key: data.cluster_key.clone(),
            mode: data.mode,
            period: data.period.clone(),
            run_id: data.run_id.clone(),
            active: true,
        });
        Ok(record_ref)
    }

    async fn create_membership(
        &self,
        unit_id: &str,
        cluster_ref: &str,
        _confidence: f64,
        is_primary: bool,
        _method: &str,
    ) -> Result<(), PodgraphError> {
        self.state.lock().unwrap().memberships.push((
            unit_id.to_string(),
            cluster_ref.to_string(),
            is_primary,
        ));
        Ok(())
    }

    async fn link_produced(
        &self,
        _state_ref: &str,
        _cluster_ref: &str,
    ) -> Result<(), PodgraphError> {
        Ok(())
    }
}

#[async_trait]
impl EvolutionStore for InMemoryGraph {
    async fn load_previous_generation(
        &self,
    ) -> Result<Option<PreviousGeneration>, PodgraphError> {
        let run_id = {
            let state = self.state.lock().unwrap();
            state.complete_current_runs.last().cloned()
        };
        Ok(run_id.map(|run_id| self.generation_for_run(&run_id)))
    }

    async fn load_snapshot_generation(
        &self,
        period: &str,
    ) -> Result<Option<PreviousGeneration>, PodgraphError> {
        let run_id = {
            let state = self.state.lock().unwrap();
            state
                .clusters
                .iter()
                .find(|c| {
                    c.mode == GenerationMode::Snapshot && c.period.as_deref() == Some(period)
                })
                .map(|c| c.run_id.clone())
        };
        Ok(run_id.map(|run_id| self.generation_for_run(&run_id)))
    }

    async fn create_evolution_edge(
        &self,
        from_ref: &str,
        to_ref: &str,
        kind: &str,
        _proportion: f64,
        _total_units: i64,
        _from_period: Option<&str>,
        _to_period: Option<&str>,
    ) -> Result<(), PodgraphError> {
        self.state.lock().unwrap().edges.push((
            from_ref.to_string(),
            to_ref.to_string(),
            kind.to_string(),
        ));
        Ok(())
    }
}

fn test_config() -> ClusteringConfig {
    ClusteringConfig {
        min_samples: 3,
        density_radius: 0.3,
        min_cluster_size: MinClusterSize::Fixed { size: 3 },
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            backoff_factor: 2.0,
            jitter: false,
        },
        labeling: LabelingConfig {
            llm_attempts: 1,
            llm_retry_base_ms: 1,
            ..LabelingConfig::default()
        },
        ..ClusteringConfig::default()
    }
}

fn build_pipeline(graph: Arc<InMemoryGraph>) -> ClusteringPipeline {
    let config = test_config();
    ClusteringPipeline::new(
        Arc::new(BlobSource),
        DensityClusterer::new(config.clone()),
        ClusterLabeler::new(Arc::new(DisabledTextGenerator), config.labeling.clone()),
        GraphPersistence::new(graph.clone(), config.retry.clone()),
        EvolutionTracker::new(graph, config.evolution.clone()),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_run_builds_a_live_generation() {
    let graph = Arc::new(InMemoryGraph::default());
    let mut pipeline = build_pipeline(graph.clone());

    let outcome = pipeline.run_current().await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let stats = outcome.stats.expect("success outcome carries stats");
    assert_eq!(stats.n_clusters, 2);
    assert_eq!(stats.n_outliers, 2);
    assert_eq!(stats.total_units, 22);
    assert_eq!(stats.archived_clusters, 0);
    // no generator configured: every label is a synthetic fallback
    assert_eq!(stats.labels.fallbacks, 2);
    assert!(stats.evolution.is_none());

    let state = graph.state.lock().unwrap();
    assert_eq!(state.clusters.len(), 2);
    assert!(state.clusters.iter().all(|c| c.active));
    assert_eq!(state.memberships.len(), 20);
    assert!(state.memberships.iter().all(|(_, _, primary)| *primary));
}

#[tokio::test]
async fn second_run_archives_and_records_continuations() {
    let graph = Arc::new(InMemoryGraph::default());

    let outcome = build_pipeline(graph.clone()).run_current().await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let outcome = build_pipeline(graph.clone()).run_current().await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let stats = outcome.stats.expect("success outcome carries stats");
    assert_eq!(stats.archived_clusters, 2);

    let evolution = stats.evolution.expect("second run tracks evolution");
    // identical embeddings both times: each cluster continues wholesale
    assert_eq!(evolution.continuations, 2);
    assert_eq!(evolution.splits, 0);
    assert_eq!(evolution.merges, 0);
    assert_eq!(evolution.edges_created, 2);
    assert_eq!(evolution.edges_failed, 0);

    let state = graph.state.lock().unwrap();
    assert_eq!(state.clusters.len(), 4);
    assert_eq!(state.clusters.iter().filter(|c| c.active).count(), 2);
    assert!(state.edges.iter().all(|(_, _, kind)| kind == "continuation"));
    // archived generation keeps its membership edges, demoted to non-primary
    assert_eq!(state.memberships.len(), 40);
    assert_eq!(
        state
            .memberships
            .iter()
            .filter(|(_, _, primary)| *primary)
            .count(),
        20
    );
}

#[tokio::test]
async fn snapshot_runs_leave_the_live_generation_alone() {
    let graph = Arc::new(InMemoryGraph::default());

    let outcome = build_pipeline(graph.clone()).run_current().await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let outcome = build_pipeline(graph.clone()).run_snapshot("2023Q1").await;
    assert_eq!(outcome.status, PipelineStatus::Success);
    let stats = outcome.stats.expect("success outcome carries stats");
    assert_eq!(stats.archived_clusters, 0);
    assert!(stats.evolution.is_none());

    let state = graph.state.lock().unwrap();
    let live_active = state
        .clusters
        .iter()
        .filter(|c| c.mode == GenerationMode::Current && c.active)
        .count();
    assert_eq!(live_active, 2);
    // snapshot memberships never claim primary
    let snapshot_refs: Vec<&str> = state
        .clusters
        .iter()
        .filter(|c| c.mode == GenerationMode::Snapshot)
        .map(|c| c.record_ref.as_str())
        .collect();
    assert!(state
        .memberships
        .iter()
        .filter(|(_, cluster_ref, _)| snapshot_refs.contains(&cluster_ref.as_str()))
        .all(|(_, _, primary)| !primary));
}

#[tokio::test]
async fn compare_snapshots_records_edges_between_periods() {
    let graph = Arc::new(InMemoryGraph::default());

    let outcome = build_pipeline(graph.clone()).run_snapshot("2023Q1").await;
    assert_eq!(outcome.status, PipelineStatus::Success);
    let outcome = build_pipeline(graph.clone()).run_snapshot("2023Q2").await;
    assert_eq!(outcome.status, PipelineStatus::Success);

    let pipeline = build_pipeline(graph.clone());
    let report = pipeline.compare_snapshots("2023Q1", "2023Q2").await.unwrap();
    assert_eq!(report.continuations, 2);
    assert_eq!(report.edges_created, 2);

    let missing = pipeline.compare_snapshots("2023Q1", "2024Q1").await;
    assert!(matches!(missing, Err(PodgraphError::NotFound { .. })));
}

#[tokio::test]
async fn empty_extraction_is_an_error_outcome() {
    struct EmptySource;

    #[async_trait]
    impl EmbeddingSource for EmptySource {
        async fn extract_all(&self) -> Result<EmbeddingExtraction, PodgraphError> {
            Ok(EmbeddingExtraction::default())
        }

        async fn extract_for_episode(
            &self,
            _episode_id: &str,
        ) -> Result<EmbeddingExtraction, PodgraphError> {
            Ok(EmbeddingExtraction::default())
        }
    }

    let graph = Arc::new(InMemoryGraph::default());
    let config = test_config();
    let mut pipeline = ClusteringPipeline::new(
        Arc::new(EmptySource),
        DensityClusterer::new(config.clone()),
        ClusterLabeler::new(Arc::new(DisabledTextGenerator), config.labeling.clone()),
        GraphPersistence::new(graph.clone(), config.retry.clone()),
        EvolutionTracker::new(graph.clone(), config.evolution.clone()),
    );

    let outcome = pipeline.run_current().await;
    assert_eq!(outcome.status, PipelineStatus::Error);
    assert!(graph.state.lock().unwrap().clusters.is_empty());
}
