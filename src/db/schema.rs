use crate::db::connection::PodDb;
use crate::PodgraphError;

/// Knowledge graph foundation: episodes and meaningful units.
const SCHEMA_001: &str = include_str!("migrations/001_knowledge_units.surql");

/// Clustering generations: clusters, run records, memberships, evolution edges.
const SCHEMA_002: &str = include_str!("migrations/002_clustering.surql");

/// Apply the database schema to an initialized database connection.
///
/// Executes all DEFINE statements, creating tables, fields, and indexes:
/// - 001: Knowledge units (episode, meaningful_unit)
/// - 002: Clustering (cluster, clustering_state, in_cluster, evolved_into, produced)
///
/// It's safe to call multiple times - SurrealDB will update existing
/// definitions rather than fail.
pub async fn apply_schema(db: &PodDb) -> Result<(), PodgraphError> {
    db.query(SCHEMA_001).await?;
    db.query(SCHEMA_002).await?;
    Ok(())
}
