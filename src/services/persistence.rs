//! Graph persistence for clustering results.
//!
//! SurrealDB has no multi-statement transactions over the `Any` engine, so a
//! run is written as an ordered sequence with a phase marker on its
//! `clustering_state` record: started, archive_done, clusters_written,
//! links_written, complete. A crash leaves the marker at the last finished
//! step; evolution tracking only trusts runs whose phase reached `complete`.
//!
//! The whole sequence is wrapped in retry with exponential backoff. Every
//! attempt is a fresh run record, and re-archiving is a no-op on the second
//! pass, so a retried write still converges to exactly one active current
//! generation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::db::connection::PodDb;
use crate::models::cluster::{self, cluster_key, ClusterCreate};
use crate::models::{parse_record_ref, state, GenerationMode, RunPhase, StateCreate};
use crate::services::clustering::ClusterResult;
use crate::utils::retry::retry_with_backoff;
use crate::PodgraphError;

/// Summary fields persisted on the clustering_state record.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: GenerationMode,
    pub period: Option<String>,
    pub n_clusters: i64,
    pub n_outliers: i64,
    pub total_units: i64,
    pub outlier_ratio: f64,
    pub min_cluster_size: i64,
    pub avg_cluster_size: f64,
    pub max_cluster_size: i64,
}

/// Data for one new cluster node.
#[derive(Debug, Clone)]
pub struct NewCluster {
    pub cluster_key: String,
    pub label: String,
    pub member_count: i64,
    pub centroid: Vec<f32>,
    pub mode: GenerationMode,
    pub period: Option<String>,
    pub run_id: String,
}

/// Data access abstraction for the persistence sequence.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Create the run's state record at phase `started`. Returns its ref.
    async fn create_run_record(&self, summary: &RunSummary) -> Result<String, PodgraphError>;

    async fn set_run_phase(&self, run_id: &str, phase: RunPhase) -> Result<(), PodgraphError>;

    /// Archive active current clusters and demote their primary memberships.
    /// Returns (archived clusters, demoted memberships).
    async fn archive_current_generation(&self) -> Result<(usize, usize), PodgraphError>;

    /// Create one cluster node. Returns its record ref.
    async fn create_cluster(&self, data: &NewCluster) -> Result<String, PodgraphError>;

    async fn create_membership(
        &self,
        unit_id: &str,
        cluster_ref: &str,
        confidence: f64,
        is_primary: bool,
        method: &str,
    ) -> Result<(), PodgraphError>;

    /// Link the state record to one produced cluster.
    async fn link_produced(
        &self,
        state_ref: &str,
        cluster_ref: &str,
    ) -> Result<(), PodgraphError>;
}

/// SurrealDB implementation of ClusterStore.
pub struct SurrealClusterStore {
    db: Arc<PodDb>,
}

impl SurrealClusterStore {
    pub fn new(db: Arc<PodDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ClusterStore for SurrealClusterStore {
    async fn create_run_record(&self, summary: &RunSummary) -> Result<String, PodgraphError> {
        let created = state::create_state(
            &self.db,
            StateCreate {
                run_id: summary.run_id.clone(),
                run_type: summary.mode,
                period: summary.period.clone(),
                phase: RunPhase::Started,
                n_clusters: summary.n_clusters,
                n_outliers: summary.n_outliers,
                total_units: summary.total_units,
                outlier_ratio: summary.outlier_ratio,
                min_cluster_size: summary.min_cluster_size,
                avg_cluster_size: summary.avg_cluster_size,
                max_cluster_size: summary.max_cluster_size,
            },
        )
        .await?;
        Ok(created.id.to_string())
    }

    async fn set_run_phase(&self, run_id: &str, phase: RunPhase) -> Result<(), PodgraphError> {
        state::set_phase(&self.db, run_id, phase).await
    }

    async fn archive_current_generation(&self) -> Result<(usize, usize), PodgraphError> {
        let archived = cluster::archive_current_generation(&self.db).await?;
        let demoted = cluster::demote_primary_memberships(&self.db).await?;
        Ok((archived, demoted))
    }

    async fn create_cluster(&self, data: &NewCluster) -> Result<String, PodgraphError> {
        let created = cluster::create_cluster(
            &self.db,
            ClusterCreate {
                cluster_key: data.cluster_key.clone(),
                label: data.label.clone(),
                member_count: data.member_count,
                centroid: data.centroid.clone(),
                status: "active".to_string(),
                mode: data.mode,
                period: data.period.clone(),
                run_id: data.run_id.clone(),
            },
        )
        .await?;
        Ok(created.id.to_string())
    }

    async fn create_membership(
        &self,
        unit_id: &str,
        cluster_ref: &str,
        confidence: f64,
        is_primary: bool,
        method: &str,
    ) -> Result<(), PodgraphError> {
        let cluster_id = parse_record_ref(cluster_ref)?;
        cluster::create_membership(&self.db, unit_id, &cluster_id, confidence, is_primary, method)
            .await?;
        Ok(())
    }

    async fn link_produced(
        &self,
        state_ref: &str,
        cluster_ref: &str,
    ) -> Result<(), PodgraphError> {
        let state_id = parse_record_ref(state_ref)?;
        let cluster_id = parse_record_ref(cluster_ref)?;
        state::link_produced(&self.db, &state_id, &cluster_id).await
    }
}

// ---------------------------------------------------------------------------
// GraphPersistence
// ---------------------------------------------------------------------------

/// What one persisted run wrote.
#[derive(Debug, Clone, Default)]
pub struct PersistStats {
    pub run_id: String,
    pub clusters_created: usize,
    pub memberships_created: usize,
    pub archived_clusters: usize,
    pub demoted_memberships: usize,
    /// cluster key -> cluster record ref, for evolution edge creation.
    pub cluster_refs: HashMap<String, String>,
}

/// Writes clustering results to the graph as an ordered, phase-marked
/// sequence, retried as a whole on failure.
pub struct GraphPersistence {
    store: Arc<dyn ClusterStore>,
    retry: RetryPolicy,
}

impl GraphPersistence {
    pub fn new(store: Arc<dyn ClusterStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Persist one clustering result. Clusters without a label in `labels`
    /// receive a synthetic `Cluster_{id}` fallback.
    pub async fn update_graph(
        &self,
        result: &ClusterResult,
        labels: &HashMap<i64, String>,
        mode: GenerationMode,
        period: Option<&str>,
    ) -> Result<PersistStats, PodgraphError> {
        retry_with_backoff(&self.retry, "graph persistence", || {
            self.apply_sequence(result, labels, mode, period)
        })
        .await
    }

    async fn apply_sequence(
        &self,
        result: &ClusterResult,
        labels: &HashMap<i64, String>,
        mode: GenerationMode,
        period: Option<&str>,
    ) -> Result<PersistStats, PodgraphError> {
        // Fresh run id per attempt: a failed attempt leaves its state record
        // stuck at a pre-complete phase, which is the crash audit trail.
        let run_id = format!(
            "run_{}_{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut stats = PersistStats {
            run_id: run_id.clone(),
            ..PersistStats::default()
        };

        let (min_size, avg_size, max_size) = result.size_stats();
        let state_ref = self
            .store
            .create_run_record(&RunSummary {
                run_id: run_id.clone(),
                mode,
                period: period.map(str::to_string),
                n_clusters: result.n_clusters() as i64,
                n_outliers: result.n_outliers() as i64,
                total_units: result.total_units as i64,
                outlier_ratio: result.outlier_ratio(),
                min_cluster_size: min_size as i64,
                avg_cluster_size: avg_size,
                max_cluster_size: max_size as i64,
            })
            .await?;

        if mode == GenerationMode::Current {
            let (archived, demoted) = self.store.archive_current_generation().await?;
            stats.archived_clusters = archived;
            stats.demoted_memberships = demoted;
            info!(
                "Archived {} cluster(s), demoted {} membership(s)",
                archived, demoted
            );
            self.store
                .set_run_phase(&run_id, RunPhase::ArchiveDone)
                .await?;
        } else {
            debug!("Snapshot run: skipping archive step");
        }

        for detected in &result.clusters {
            let key = cluster_key(mode, period, detected.cluster_id);
            let label = labels
                .get(&detected.cluster_id)
                .cloned()
                .unwrap_or_else(|| format!("Cluster_{}", detected.cluster_id));
            let cluster_ref = self
                .store
                .create_cluster(&NewCluster {
                    cluster_key: key.clone(),
                    label,
                    member_count: detected.members.len() as i64,
                    centroid: detected.centroid.clone(),
                    mode,
                    period: period.map(str::to_string),
                    run_id: run_id.clone(),
                })
                .await?;
            stats.cluster_refs.insert(key, cluster_ref);
            stats.clusters_created += 1;
        }
        self.store
            .set_run_phase(&run_id, RunPhase::ClustersWritten)
            .await?;

        // snapshot memberships never claim primary: the live generation owns it
        let is_primary = mode == GenerationMode::Current;
        for detected in &result.clusters {
            let key = cluster_key(mode, period, detected.cluster_id);
            let cluster_ref = &stats.cluster_refs[&key];
            for member in &detected.members {
                self.store
                    .create_membership(
                        &member.unit_id,
                        cluster_ref,
                        member.confidence as f64,
                        is_primary,
                        "density",
                    )
                    .await?;
                stats.memberships_created += 1;
            }
        }

        for cluster_ref in stats.cluster_refs.values() {
            self.store.link_produced(&state_ref, cluster_ref).await?;
        }
        self.store
            .set_run_phase(&run_id, RunPhase::LinksWritten)
            .await?;
        self.store.set_run_phase(&run_id, RunPhase::Complete).await?;

        info!(
            "Persisted run {}: {} cluster(s), {} membership(s)",
            run_id, stats.clusters_created, stats.memberships_created
        );
        Ok(stats)
    }
}
