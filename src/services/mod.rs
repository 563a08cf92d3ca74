pub mod clustering;
pub mod embedding_source;
pub mod evolution;
pub mod labeling;
pub mod persistence;
pub mod pipeline;

pub use clustering::{ClusterResult, DensityClusterer};
pub use embedding_source::{EmbeddingExtraction, EmbeddingSource, SurrealEmbeddingSource};
pub use evolution::{EvolutionReport, EvolutionTracker, SurrealEvolutionStore};
pub use labeling::ClusterLabeler;
pub use persistence::{GraphPersistence, PersistStats, SurrealClusterStore};
pub use pipeline::{ClusteringPipeline, PipelineOutcome, PipelineStatus};
