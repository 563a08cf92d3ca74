//! Persisted cluster generations.
//!
//! Each clustering run creates fresh `cluster` records with a
//! generation-scoped `cluster_key` (`current_cluster_0`,
//! `snapshot_2023Q1_cluster_0`, ...) and `in_cluster` membership edges.
//! Previous current-mode generations are archived, never deleted — the full
//! history backs evolution comparison and audit.

use serde::{Deserialize, Serialize};
use surrealdb::{Datetime, RecordId};

use crate::db::connection::PodDb;
use crate::models::GenerationMode;
use crate::PodgraphError;

/// A persisted cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: RecordId,
    pub cluster_key: String,
    pub label: String,
    pub member_count: i64,
    pub centroid: Vec<f32>,
    pub status: String,
    pub mode: String,
    pub period: Option<String>,
    pub run_id: String,
    pub created_at: Datetime,
    pub archived_at: Option<Datetime>,
}

/// Data for creating a new cluster node.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterCreate {
    pub cluster_key: String,
    pub label: String,
    pub member_count: i64,
    pub centroid: Vec<f32>,
    pub status: String,
    pub mode: GenerationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub run_id: String,
}

/// A membership edge: meaningful unit belongs to a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub id: RecordId,
    #[serde(rename = "in")]
    pub unit: RecordId,
    #[serde(rename = "out")]
    pub cluster: RecordId,
    pub confidence: f64,
    pub is_primary: bool,
    pub method: String,
    pub assigned_at: Datetime,
    pub archived_at: Option<Datetime>,
}

/// Build the generation-scoped cluster key for cluster `index` of a run.
pub fn cluster_key(mode: GenerationMode, period: Option<&str>, index: i64) -> String {
    match (mode, period) {
        (GenerationMode::Snapshot, Some(p)) => format!("snapshot_{}_cluster_{}", p, index),
        _ => format!("current_cluster_{}", index),
    }
}

// ============================================================================
// Cluster CRUD Operations
// ============================================================================

/// Create a cluster node with a server-assigned record id.
pub async fn create_cluster(db: &PodDb, data: ClusterCreate) -> Result<Cluster, PodgraphError> {
    let result: Option<Cluster> = db.create("cluster").content(data).await?;
    result.ok_or_else(|| PodgraphError::Database("Failed to create cluster".into()))
}

/// Archive every active current-mode cluster. Returns the archived count.
pub async fn archive_current_generation(db: &PodDb) -> Result<usize, PodgraphError> {
    let mut result = db
        .query(
            "UPDATE cluster SET status = 'archived', archived_at = time::now() \
             WHERE mode = 'current' AND status = 'active' RETURN AFTER",
        )
        .await?;
    let archived: Vec<Cluster> = result.take(0)?;
    Ok(archived.len())
}

/// Flip every primary membership edge to non-primary. Returns the count.
pub async fn demote_primary_memberships(db: &PodDb) -> Result<usize, PodgraphError> {
    let mut result = db
        .query(
            "UPDATE in_cluster SET is_primary = false, archived_at = time::now() \
             WHERE is_primary = true RETURN AFTER",
        )
        .await?;
    let demoted: Vec<ClusterMembership> = result.take(0)?;
    Ok(demoted.len())
}

/// Create a membership edge from a meaningful unit to a cluster.
pub async fn create_membership(
    db: &PodDb,
    unit_id: &str,
    cluster: &RecordId,
    confidence: f64,
    is_primary: bool,
    method: &str,
) -> Result<ClusterMembership, PodgraphError> {
    let (unit_table, unit_key) = unit_id
        .split_once(':')
        .ok_or_else(|| PodgraphError::Validation(format!("Invalid unit ID: {}", unit_id)))?;
    let unit_ref = RecordId::from((unit_table, unit_key));

    let mut result = db
        .query(
            "RELATE $from->in_cluster->$to SET \
             confidence = $confidence, \
             is_primary = $is_primary, \
             method = $method",
        )
        .bind(("from", unit_ref))
        .bind(("to", cluster.clone()))
        .bind(("confidence", confidence))
        .bind(("is_primary", is_primary))
        .bind(("method", method.to_string()))
        .await?;

    let membership: Option<ClusterMembership> = result.take(0)?;
    membership.ok_or_else(|| PodgraphError::Database("Failed to create membership edge".into()))
}

/// All active current-mode clusters (the live generation).
pub async fn active_current_clusters(db: &PodDb) -> Result<Vec<Cluster>, PodgraphError> {
    let mut result = db
        .query(
            "SELECT * FROM cluster WHERE mode = 'current' AND status = 'active' \
             ORDER BY member_count DESC",
        )
        .await?;
    let clusters: Vec<Cluster> = result.take(0)?;
    Ok(clusters)
}

/// All clusters produced by one run.
pub async fn clusters_for_run(db: &PodDb, run_id: &str) -> Result<Vec<Cluster>, PodgraphError> {
    let mut result = db
        .query("SELECT * FROM cluster WHERE run_id = $run_id ORDER BY cluster_key ASC")
        .bind(("run_id", run_id.to_string()))
        .await?;
    let clusters: Vec<Cluster> = result.take(0)?;
    Ok(clusters)
}

/// All snapshot clusters for one period.
pub async fn clusters_for_period(db: &PodDb, period: &str) -> Result<Vec<Cluster>, PodgraphError> {
    let mut result = db
        .query(
            "SELECT * FROM cluster WHERE mode = 'snapshot' AND period = $period \
             ORDER BY cluster_key ASC",
        )
        .bind(("period", period.to_string()))
        .await?;
    let clusters: Vec<Cluster> = result.take(0)?;
    Ok(clusters)
}

/// Unit-to-cluster-key assignments for all clusters of one run.
pub async fn assignments_for_run(
    db: &PodDb,
    run_id: &str,
) -> Result<Vec<(String, String)>, PodgraphError> {
    let mut result = db
        .query(
            "SELECT type::string(in) AS unit, out.cluster_key AS cluster_key \
             FROM in_cluster WHERE out.run_id = $run_id",
        )
        .bind(("run_id", run_id.to_string()))
        .await?;

    #[derive(Deserialize)]
    struct AssignmentRow {
        unit: String,
        cluster_key: String,
    }

    let rows: Vec<AssignmentRow> = result.take(0)?;
    Ok(rows.into_iter().map(|r| (r.unit, r.cluster_key)).collect())
}
