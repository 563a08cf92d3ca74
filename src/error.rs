use thiserror::Error;

/// Custom error type for podgraph operations.
#[derive(Debug, Error)]
pub enum PodgraphError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Requested record was not found.
    #[error("Not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The density clustering algorithm failed.
    #[error("Clustering error: {0}")]
    Clustering(String),

    /// Text generation (LLM) call failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Configuration loading or parsing failed.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<surrealdb::Error> for PodgraphError {
    fn from(err: surrealdb::Error) -> Self {
        PodgraphError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PodgraphError {
    fn from(err: serde_json::Error) -> Self {
        PodgraphError::Database(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for PodgraphError {
    fn from(err: std::io::Error) -> Self {
        PodgraphError::Database(format!("I/O error: {}", err))
    }
}

impl From<reqwest::Error> for PodgraphError {
    fn from(err: reqwest::Error) -> Self {
        PodgraphError::Generation(format!("HTTP error: {}", err))
    }
}
