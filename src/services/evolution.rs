//! Cluster evolution tracking across runs.
//!
//! Reconstructs the previous generation's unit assignments, builds a
//! transition matrix against the current run's in-memory result, and
//! classifies transitions into split/merge/continuation events using
//! threshold rules. The classification checks are independent: an old
//! cluster can satisfy more than one criterion under degenerate threshold
//! configurations, and that ambiguity is accepted rather than resolved.
//!
//! Event persistence is best-effort and append-only: a failed edge write is
//! logged and counted while the remaining edges are still attempted, and no
//! deduplication against pre-existing edges is performed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EvolutionThresholds;
use crate::db::connection::PodDb;
use crate::models::cluster::{self, cluster_key};
use crate::models::{parse_record_ref, state, GenerationMode};
use crate::services::clustering::ClusterResult;
use crate::PodgraphError;

/// Sentinel destination for units with no assignment in the newer run.
pub const OUTLIER_KEY: &str = "outlier";

/// Counts of units moving from each old cluster to each new cluster
/// (or the outlier sentinel).
#[derive(Debug, Clone, Default)]
pub struct TransitionMatrix {
    counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl TransitionMatrix {
    pub fn record(&mut self, old_key: &str, new_key: &str) {
        *self
            .counts
            .entry(old_key.to_string())
            .or_default()
            .entry(new_key.to_string())
            .or_insert(0) += 1;
    }

    /// Build a matrix directly from counts (test and tooling convenience).
    pub fn from_counts<I, J, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, J)>,
        J: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut matrix = TransitionMatrix::default();
        for (old_key, row) in counts {
            let entry = matrix.counts.entry(old_key.into()).or_default();
            for (new_key, count) in row {
                *entry.entry(new_key.into()).or_insert(0) += count;
            }
        }
        matrix
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// One unit flow between an old and a new cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionFlow {
    pub source: String,
    pub destination: String,
    /// Fraction of the source cluster's (non-outlier) units that moved.
    pub proportion: f64,
    /// Denominator used: the source cluster's non-outlier unit total.
    pub total_units: usize,
}

/// A classified evolution event.
#[derive(Debug, Clone, Serialize)]
pub enum EvolutionEvent {
    /// One old cluster feeding two or more qualifying destinations.
    Split {
        source: String,
        flows: Vec<TransitionFlow>,
    },
    /// One new cluster fed by two or more qualifying sources.
    Merge {
        destination: String,
        flows: Vec<TransitionFlow>,
    },
    /// A single dominant destination above the continuation threshold.
    Continuation { flow: TransitionFlow },
}

impl EvolutionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EvolutionEvent::Split { .. } => "split",
            EvolutionEvent::Merge { .. } => "merge",
            EvolutionEvent::Continuation { .. } => "continuation",
        }
    }
}

/// Build the transition matrix from previous assignments and the current
/// assignment map. Units with no current assignment land in the outlier
/// bucket.
pub fn build_transition_matrix(
    previous: &HashMap<String, String>,
    current: &HashMap<String, String>,
) -> TransitionMatrix {
    let mut matrix = TransitionMatrix::default();
    for (unit_id, old_key) in previous {
        let new_key = current.get(unit_id).map_or(OUTLIER_KEY, String::as_str);
        matrix.record(old_key, new_key);
    }
    matrix
}

/// Classify all transitions in the matrix. Split, merge, and continuation
/// are computed independently from counts alone.
pub fn classify_transitions(
    matrix: &TransitionMatrix,
    thresholds: &EvolutionThresholds,
) -> Vec<EvolutionEvent> {
    let mut events = Vec::new();
    // destination -> qualifying inbound flows, for merge detection
    let mut inbound: BTreeMap<String, Vec<TransitionFlow>> = BTreeMap::new();

    for (old_key, row) in &matrix.counts {
        let total: usize = row
            .iter()
            .filter(|(dest, _)| dest.as_str() != OUTLIER_KEY)
            .map(|(_, count)| count)
            .sum();
        if total == 0 {
            debug!("Old cluster {} fully dissolved into outliers", old_key);
            continue;
        }

        let mut flows: Vec<TransitionFlow> = row
            .iter()
            .filter(|(dest, _)| dest.as_str() != OUTLIER_KEY)
            .map(|(dest, count)| TransitionFlow {
                source: old_key.clone(),
                destination: dest.clone(),
                proportion: *count as f64 / total as f64,
                total_units: total,
            })
            .collect();
        flows.sort_by(|a, b| {
            b.proportion
                .partial_cmp(&a.proportion)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let qualifying: Vec<TransitionFlow> = flows
            .iter()
            .filter(|f| f.proportion >= thresholds.split_threshold)
            .cloned()
            .collect();
        for flow in &qualifying {
            inbound
                .entry(flow.destination.clone())
                .or_default()
                .push(flow.clone());
        }

        if qualifying.len() >= 2 {
            events.push(EvolutionEvent::Split {
                source: old_key.clone(),
                flows: qualifying,
            });
        }

        if let Some(dominant) = flows.first() {
            if dominant.proportion >= thresholds.continuation_threshold {
                events.push(EvolutionEvent::Continuation {
                    flow: dominant.clone(),
                });
            }
        }
    }

    for (destination, flows) in inbound {
        if flows.len() >= 2 {
            events.push(EvolutionEvent::Merge { destination, flows });
        }
    }

    events
}

/// Unit-to-cluster-key assignments for an in-memory cluster result.
pub fn assignment_map(
    result: &ClusterResult,
    mode: GenerationMode,
    period: Option<&str>,
) -> HashMap<String, String> {
    let mut assignments = HashMap::new();
    for detected in &result.clusters {
        let key = cluster_key(mode, period, detected.cluster_id);
        for member in &detected.members {
            assignments.insert(member.unit_id.clone(), key.clone());
        }
    }
    assignments
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// A reconstructed historical generation.
#[derive(Debug, Clone, Default)]
pub struct PreviousGeneration {
    pub run_id: String,
    /// unit id -> cluster key
    pub assignments: HashMap<String, String>,
    /// cluster key -> cluster record ref (e.g. `cluster:abc123`)
    pub cluster_refs: HashMap<String, String>,
}

/// Data access abstraction for evolution tracking.
#[async_trait]
pub trait EvolutionStore: Send + Sync {
    /// The most recent completed current-mode generation, if any.
    async fn load_previous_generation(&self)
        -> Result<Option<PreviousGeneration>, PodgraphError>;

    /// A persisted snapshot generation for one period, if any.
    async fn load_snapshot_generation(
        &self,
        period: &str,
    ) -> Result<Option<PreviousGeneration>, PodgraphError>;

    /// Append one evolution edge between two persisted clusters.
    #[allow(clippy::too_many_arguments)]
    async fn create_evolution_edge(
        &self,
        from_ref: &str,
        to_ref: &str,
        kind: &str,
        proportion: f64,
        total_units: i64,
        from_period: Option<&str>,
        to_period: Option<&str>,
    ) -> Result<(), PodgraphError>;
}

/// SurrealDB implementation of EvolutionStore.
pub struct SurrealEvolutionStore {
    db: Arc<PodDb>,
}

impl SurrealEvolutionStore {
    pub fn new(db: Arc<PodDb>) -> Self {
        Self { db }
    }

    fn generation_from_parts(
        run_id: String,
        clusters: Vec<crate::models::Cluster>,
        assignments: Vec<(String, String)>,
    ) -> PreviousGeneration {
        PreviousGeneration {
            run_id,
            assignments: assignments.into_iter().collect(),
            cluster_refs: clusters
                .into_iter()
                .map(|c| (c.cluster_key, c.id.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl EvolutionStore for SurrealEvolutionStore {
    async fn load_previous_generation(
        &self,
    ) -> Result<Option<PreviousGeneration>, PodgraphError> {
        let Some(previous_state) = state::latest_complete_current_state(&self.db).await? else {
            return Ok(None);
        };
        let clusters = cluster::clusters_for_run(&self.db, &previous_state.run_id).await?;
        let assignments = cluster::assignments_for_run(&self.db, &previous_state.run_id).await?;
        Ok(Some(Self::generation_from_parts(
            previous_state.run_id,
            clusters,
            assignments,
        )))
    }

    async fn load_snapshot_generation(
        &self,
        period: &str,
    ) -> Result<Option<PreviousGeneration>, PodgraphError> {
        let clusters = cluster::clusters_for_period(&self.db, period).await?;
        if clusters.is_empty() {
            return Ok(None);
        }
        let run_id = clusters[0].run_id.clone();
        let assignments = cluster::assignments_for_run(&self.db, &run_id).await?;
        Ok(Some(Self::generation_from_parts(
            run_id,
            clusters,
            assignments,
        )))
    }

    async fn create_evolution_edge(
        &self,
        from_ref: &str,
        to_ref: &str,
        kind: &str,
        proportion: f64,
        total_units: i64,
        from_period: Option<&str>,
        to_period: Option<&str>,
    ) -> Result<(), PodgraphError> {
        let from = parse_record_ref(from_ref)?;
        let to = parse_record_ref(to_ref)?;
        crate::models::evolution::create_evolution_edge(
            &self.db,
            &from,
            &to,
            kind,
            proportion,
            total_units,
            from_period,
            to_period,
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EvolutionTracker
// ---------------------------------------------------------------------------

/// Outcome of one evolution tracking pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvolutionReport {
    pub splits: usize,
    pub merges: usize,
    pub continuations: usize,
    pub edges_created: usize,
    pub edges_failed: usize,
}

/// Detects and persists cluster evolution events.
pub struct EvolutionTracker {
    store: Arc<dyn EvolutionStore>,
    thresholds: EvolutionThresholds,
}

impl EvolutionTracker {
    pub fn new(store: Arc<dyn EvolutionStore>, thresholds: EvolutionThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Snapshot the previous generation's assignments.
    ///
    /// Must run before the persistence step archives the current generation;
    /// diffing against already-replaced state silently yields zero events.
    pub async fn load_previous(&self) -> Result<Option<PreviousGeneration>, PodgraphError> {
        self.store.load_previous_generation().await
    }

    /// Classify transitions from `previous` into `current_assignments` and
    /// persist one edge per flow. Per-edge failures are logged and counted.
    pub async fn track(
        &self,
        previous: &PreviousGeneration,
        current_assignments: &HashMap<String, String>,
        new_cluster_refs: &HashMap<String, String>,
        from_period: Option<&str>,
        to_period: Option<&str>,
    ) -> EvolutionReport {
        let matrix = build_transition_matrix(&previous.assignments, current_assignments);
        if matrix.is_empty() {
            return EvolutionReport::default();
        }

        let events = classify_transitions(&matrix, &self.thresholds);
        let mut report = EvolutionReport::default();

        for event in &events {
            let flows: Vec<&TransitionFlow> = match event {
                EvolutionEvent::Split { flows, .. } => {
                    report.splits += 1;
                    flows.iter().collect()
                }
                EvolutionEvent::Merge { flows, .. } => {
                    report.merges += 1;
                    flows.iter().collect()
                }
                EvolutionEvent::Continuation { flow } => {
                    report.continuations += 1;
                    vec![flow]
                }
            };

            for flow in flows {
                let Some(from_ref) = previous.cluster_refs.get(&flow.source) else {
                    warn!("No record ref for source cluster {}", flow.source);
                    report.edges_failed += 1;
                    continue;
                };
                let Some(to_ref) = new_cluster_refs.get(&flow.destination) else {
                    warn!("No record ref for destination cluster {}", flow.destination);
                    report.edges_failed += 1;
                    continue;
                };
                match self
                    .store
                    .create_evolution_edge(
                        from_ref,
                        to_ref,
                        event.kind(),
                        flow.proportion,
                        flow.total_units as i64,
                        from_period,
                        to_period,
                    )
                    .await
                {
                    Ok(()) => report.edges_created += 1,
                    Err(e) => {
                        warn!(
                            "Failed to store {} edge {} -> {}: {}",
                            event.kind(),
                            flow.source,
                            flow.destination,
                            e
                        );
                        report.edges_failed += 1;
                    }
                }
            }
        }

        info!(
            "Evolution: {} split(s), {} merge(s), {} continuation(s); {} edge(s) stored, {} failed",
            report.splits, report.merges, report.continuations, report.edges_created, report.edges_failed
        );
        report
    }

    /// Compare two persisted snapshot generations.
    pub async fn compare_snapshots(
        &self,
        from_period: &str,
        to_period: &str,
    ) -> Result<EvolutionReport, PodgraphError> {
        let from_generation = self
            .store
            .load_snapshot_generation(from_period)
            .await?
            .ok_or_else(|| PodgraphError::NotFound {
                entity_type: "snapshot generation".into(),
                id: from_period.to_string(),
            })?;
        let to_generation = self
            .store
            .load_snapshot_generation(to_period)
            .await?
            .ok_or_else(|| PodgraphError::NotFound {
                entity_type: "snapshot generation".into(),
                id: to_period.to_string(),
            })?;

        Ok(self
            .track(
                &from_generation,
                &to_generation.assignments,
                &to_generation.cluster_refs,
                Some(from_period),
                Some(to_period),
            )
            .await)
    }
}
