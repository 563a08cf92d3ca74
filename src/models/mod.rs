pub mod cluster;
pub mod evolution;
pub mod state;

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use crate::PodgraphError;

/// Parse a `table:key` record ref string back into a RecordId.
pub fn parse_record_ref(record_ref: &str) -> Result<RecordId, PodgraphError> {
    let (table, key) = record_ref
        .split_once(':')
        .ok_or_else(|| PodgraphError::Validation(format!("invalid record ref: {record_ref}")))?;
    // SurrealDB renders non-numeric keys with angle or backtick quoting
    let key = key.trim_matches(|c| c == '⟨' || c == '⟩' || c == '`');
    Ok(RecordId::from((table, key)))
}

/// Which generation a clustering run produces.
///
/// `Current` runs replace the live generation (archiving the previous one);
/// `Snapshot` runs cover a bounded historical period and never perturb the
/// live generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Current,
    Snapshot,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Current => "current",
            GenerationMode::Snapshot => "snapshot",
        }
    }
}

pub use cluster::{Cluster, ClusterCreate, ClusterMembership};
pub use evolution::EvolutionEdge;
pub use state::{ClusteringState, RunPhase, StateCreate};
