//! Persisted cluster evolution edges.
//!
//! `evolved_into` edges record detected splits, merges, and continuations
//! between clusters of successive generations. Writes are append-only: no
//! deduplication against pre-existing edges is attempted, so re-running a
//! comparison accumulates additional edges (audit-log semantics).

use serde::{Deserialize, Serialize};
use surrealdb::{Datetime, RecordId};

use crate::db::connection::PodDb;
use crate::PodgraphError;

/// A persisted evolution edge between two clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEdge {
    pub id: RecordId,
    #[serde(rename = "in")]
    pub source: RecordId,
    #[serde(rename = "out")]
    pub destination: RecordId,
    pub kind: String,
    pub proportion: f64,
    pub total_units: i64,
    pub from_period: Option<String>,
    pub to_period: Option<String>,
    pub created_at: Datetime,
}

/// Create one evolution edge.
#[allow(clippy::too_many_arguments)]
pub async fn create_evolution_edge(
    db: &PodDb,
    source: &RecordId,
    destination: &RecordId,
    kind: &str,
    proportion: f64,
    total_units: i64,
    from_period: Option<&str>,
    to_period: Option<&str>,
) -> Result<EvolutionEdge, PodgraphError> {
    let mut result = db
        .query(
            "RELATE $from->evolved_into->$to SET \
             kind = $kind, \
             proportion = $proportion, \
             total_units = $total_units, \
             from_period = $from_period, \
             to_period = $to_period",
        )
        .bind(("from", source.clone()))
        .bind(("to", destination.clone()))
        .bind(("kind", kind.to_string()))
        .bind(("proportion", proportion))
        .bind(("total_units", total_units))
        .bind(("from_period", from_period.map(|p| p.to_string())))
        .bind(("to_period", to_period.map(|p| p.to_string())))
        .await?;

    let edge: Option<EvolutionEdge> = result.take(0)?;
    edge.ok_or_else(|| PodgraphError::Database("Failed to create evolution edge".into()))
}
