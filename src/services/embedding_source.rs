//! Embedding extraction for clustering.
//!
//! Reads pre-computed embeddings and summaries for meaningful units from the
//! graph store. Pure query/shape logic: embeddings are created upstream by
//! the extraction pipeline and are read-only here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::db::connection::PodDb;
use crate::PodgraphError;

/// Embeddings and metadata for a set of meaningful units.
///
/// Rows correspond positionally: `unit_ids[i]` owns `embeddings[i]` and
/// `summaries[i]`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingExtraction {
    pub unit_ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub summaries: Vec<String>,
}

impl EmbeddingExtraction {
    pub fn len(&self) -> usize {
        self.unit_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_ids.is_empty()
    }
}

/// Data access abstraction for embedding extraction.
#[async_trait]
pub trait EmbeddingSource: Send + Sync {
    /// All units with embeddings.
    async fn extract_all(&self) -> Result<EmbeddingExtraction, PodgraphError>;

    /// Units with embeddings belonging to one episode.
    async fn extract_for_episode(
        &self,
        episode_id: &str,
    ) -> Result<EmbeddingExtraction, PodgraphError>;
}

/// SurrealDB implementation of EmbeddingSource.
pub struct SurrealEmbeddingSource {
    db: Arc<PodDb>,
    expected_dimensions: usize,
}

impl SurrealEmbeddingSource {
    pub fn new(db: Arc<PodDb>, expected_dimensions: usize) -> Self {
        Self {
            db,
            expected_dimensions,
        }
    }

    fn collect_rows(&self, rows: Vec<UnitRow>) -> EmbeddingExtraction {
        let mut extraction = EmbeddingExtraction::default();
        for row in rows {
            if row.embedding.len() != self.expected_dimensions {
                warn!(
                    "Dropping unit {} with embedding dimension {} (expected {})",
                    row.id,
                    row.embedding.len(),
                    self.expected_dimensions
                );
                continue;
            }
            extraction.unit_ids.push(row.id.to_string());
            extraction.embeddings.push(row.embedding);
            extraction.summaries.push(row.summary);
        }
        extraction
    }
}

#[derive(Deserialize)]
struct UnitRow {
    id: surrealdb::RecordId,
    summary: String,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingSource for SurrealEmbeddingSource {
    async fn extract_all(&self) -> Result<EmbeddingExtraction, PodgraphError> {
        let mut response = self
            .db
            .query("SELECT id, summary, embedding FROM meaningful_unit WHERE embedding IS NOT NONE")
            .await?;
        let rows: Vec<UnitRow> = response.take(0).unwrap_or_default();
        Ok(self.collect_rows(rows))
    }

    async fn extract_for_episode(
        &self,
        episode_id: &str,
    ) -> Result<EmbeddingExtraction, PodgraphError> {
        let (table, key) = episode_id.split_once(':').unwrap_or(("episode", episode_id));
        let episode_ref = surrealdb::RecordId::from((table, key));
        let mut response = self
            .db
            .query(
                "SELECT id, summary, embedding FROM meaningful_unit \
                 WHERE embedding IS NOT NONE AND episode = $episode",
            )
            .bind(("episode", episode_ref))
            .await?;
        let rows: Vec<UnitRow> = response.take(0).unwrap_or_default();
        Ok(self.collect_rows(rows))
    }
}
