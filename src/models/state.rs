//! Clustering run records.
//!
//! One `clustering_state` record is created per pipeline invocation. The
//! `phase` marker tracks progress through the non-transactional persistence
//! sequence so a crashed run leaves a detectable trace instead of an
//! ambiguous intermediate state.

use serde::{Deserialize, Serialize};
use surrealdb::{Datetime, RecordId};

use crate::db::connection::PodDb;
use crate::models::GenerationMode;
use crate::PodgraphError;

/// Saga phase of the persistence sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    ArchiveDone,
    ClustersWritten,
    LinksWritten,
    Complete,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Started => "started",
            RunPhase::ArchiveDone => "archive_done",
            RunPhase::ClustersWritten => "clusters_written",
            RunPhase::LinksWritten => "links_written",
            RunPhase::Complete => "complete",
        }
    }
}

/// A persisted run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringState {
    pub id: RecordId,
    pub run_id: String,
    pub run_type: String,
    pub period: Option<String>,
    pub phase: RunPhase,
    pub n_clusters: i64,
    pub n_outliers: i64,
    pub total_units: i64,
    pub outlier_ratio: f64,
    pub avg_cluster_size: f64,
    pub min_cluster_size: i64,
    pub max_cluster_size: i64,
    pub created_at: Datetime,
}

/// Data for creating a run record.
#[derive(Debug, Clone, Serialize)]
pub struct StateCreate {
    pub run_id: String,
    pub run_type: GenerationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub phase: RunPhase,
    pub n_clusters: i64,
    pub n_outliers: i64,
    pub total_units: i64,
    pub outlier_ratio: f64,
    pub avg_cluster_size: f64,
    pub min_cluster_size: i64,
    pub max_cluster_size: i64,
}

// ============================================================================
// ClusteringState CRUD Operations
// ============================================================================

/// Create a run record.
pub async fn create_state(db: &PodDb, data: StateCreate) -> Result<ClusteringState, PodgraphError> {
    let result: Option<ClusteringState> = db.create("clustering_state").content(data).await?;
    result.ok_or_else(|| PodgraphError::Database("Failed to create clustering state".into()))
}

/// Advance the saga phase marker for a run.
pub async fn set_phase(db: &PodDb, run_id: &str, phase: RunPhase) -> Result<(), PodgraphError> {
    db.query("UPDATE clustering_state SET phase = $phase WHERE run_id = $run_id")
        .bind(("phase", phase.as_str().to_string()))
        .bind(("run_id", run_id.to_string()))
        .await?;
    Ok(())
}

/// The most recent *completed* current-mode run, if any.
///
/// Evolution tracking diffs against this record only — an interrupted run
/// (phase != complete) never becomes the comparison baseline.
pub async fn latest_complete_current_state(
    db: &PodDb,
) -> Result<Option<ClusteringState>, PodgraphError> {
    let mut result = db
        .query(
            "SELECT * FROM clustering_state \
             WHERE run_type = 'current' AND phase = 'complete' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .await?;
    let states: Vec<ClusteringState> = result.take(0)?;
    Ok(states.into_iter().next())
}

/// The most recent run record of any type (for status reporting).
pub async fn latest_state(db: &PodDb) -> Result<Option<ClusteringState>, PodgraphError> {
    let mut result = db
        .query("SELECT * FROM clustering_state ORDER BY created_at DESC LIMIT 1")
        .await?;
    let states: Vec<ClusteringState> = result.take(0)?;
    Ok(states.into_iter().next())
}

/// Relate a run record to a cluster it produced.
pub async fn link_produced(
    db: &PodDb,
    state: &RecordId,
    cluster: &RecordId,
) -> Result<(), PodgraphError> {
    db.query("RELATE $from->produced->$to")
        .bind(("from", state.clone()))
        .bind(("to", cluster.clone()))
        .await?;
    Ok(())
}
