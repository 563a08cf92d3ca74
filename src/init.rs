//! Shared initialization logic for CLI commands.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{load_clustering_config, ClusteringConfig};
use crate::db::connection::{init_db, load_db_config, PodDb};
use crate::db::schema::apply_schema;
use crate::generation::{create_text_generator, load_generator_config};
use crate::services::{
    ClusterLabeler, ClusteringPipeline, DensityClusterer, EvolutionTracker, GraphPersistence,
    SurrealClusterStore, SurrealEmbeddingSource, SurrealEvolutionStore,
};

/// Application context holding the database handle and wired services.
pub struct AppContext {
    pub db: Arc<PodDb>,
    pub data_path: PathBuf,
    pub config: ClusteringConfig,
    pub pipeline: ClusteringPipeline,
}

impl AppContext {
    /// Initialize application context.
    ///
    /// Data path priority: explicit path > PODGRAPH_DATA_PATH env >
    /// ./.podgraph (if exists) > ~/.podgraph
    pub async fn new(explicit_path: Option<PathBuf>) -> Result<Self> {
        let data_path = explicit_path
            .or_else(|| std::env::var("PODGRAPH_DATA_PATH").ok().map(PathBuf::from))
            .or_else(|| {
                let local_path = Path::new(".podgraph");
                if local_path.exists() && local_path.is_dir() {
                    Some(local_path.to_path_buf())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".podgraph"))
                    .unwrap_or_else(|| PathBuf::from(".podgraph"))
            });

        tracing::info!("Using data path: {}", data_path.display());

        let db_config = load_db_config(&data_path);
        let db = init_db(&db_config, &data_path).await?;
        tracing::info!("Database connected");

        apply_schema(&db).await?;
        tracing::info!("Schema applied");

        let db = Arc::new(db);
        let config = load_clustering_config(&data_path);

        let generator_config = load_generator_config(&data_path);
        let generator = create_text_generator(&generator_config);

        let source = Arc::new(SurrealEmbeddingSource::new(
            db.clone(),
            config.expected_dimensions,
        ));
        let clusterer = DensityClusterer::new(config.clone());
        let labeler = ClusterLabeler::new(generator, config.labeling.clone());
        let persistence = GraphPersistence::new(
            Arc::new(SurrealClusterStore::new(db.clone())),
            config.retry.clone(),
        );
        let tracker = EvolutionTracker::new(
            Arc::new(SurrealEvolutionStore::new(db.clone())),
            config.evolution.clone(),
        );

        let pipeline = ClusteringPipeline::new(source, clusterer, labeler, persistence, tracker);

        Ok(Self {
            db,
            data_path,
            config,
            pipeline,
        })
    }
}
