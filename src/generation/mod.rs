//! Text generation for cluster labeling.
//!
//! The clustering core only needs a single-shot completion capability:
//! `generate(prompt, temperature) -> String`. One OpenAI-compatible HTTP
//! backend is provided; when no endpoint is configured the disabled backend
//! always errors, which makes every cluster fall back to a synthetic label.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::PodgraphError;

/// Single-shot, synchronous-style text generation. No streaming.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, PodgraphError>;
}

/// Text generator configuration.
///
/// Loaded from `{data_path}/generator.toml` or `PODGRAPH_GENERATOR` env var.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum GeneratorConfig {
    /// No LLM configured; labeling falls back to synthetic labels.
    Disabled,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAiCompatible {
        /// Base URL, e.g. `https://api.openai.com/v1` or a local server.
        endpoint: String,
        /// Model name passed through to the endpoint.
        model: String,
        /// API key (can also be set via `PODGRAPH_API_KEY` env var).
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Disabled
    }
}

/// Load generator config with priority:
/// 1. `{data_path}/generator.toml` file
/// 2. `PODGRAPH_GENERATOR` env var (JSON)
/// 3. Default (disabled)
pub fn load_generator_config(data_path: &Path) -> GeneratorConfig {
    let config_path = data_path.join("generator.toml");
    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<GeneratorConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded generator config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!(
                        "Failed to parse {}: {}. Using default.",
                        config_path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read {}: {}. Using default.",
                    config_path.display(),
                    e
                );
            }
        }
    }

    if let Ok(json) = std::env::var("PODGRAPH_GENERATOR") {
        match serde_json::from_str::<GeneratorConfig>(&json) {
            Ok(config) => {
                info!("Loaded generator config from PODGRAPH_GENERATOR env");
                return config;
            }
            Err(e) => {
                warn!("Failed to parse PODGRAPH_GENERATOR: {}. Using default.", e);
            }
        }
    }

    GeneratorConfig::default()
}

/// Create a text generator from configuration.
pub fn create_text_generator(config: &GeneratorConfig) -> Arc<dyn TextGenerator> {
    match config {
        GeneratorConfig::Disabled => {
            info!("No text generator configured; clusters will receive synthetic labels");
            Arc::new(DisabledTextGenerator)
        }
        GeneratorConfig::OpenAiCompatible {
            endpoint,
            model,
            api_key,
        } => {
            let key = api_key
                .clone()
                .or_else(|| std::env::var("PODGRAPH_API_KEY").ok());
            info!("Text generator: {} via {}", model, endpoint);
            Arc::new(OpenAiCompatibleGenerator::new(
                endpoint.clone(),
                model.clone(),
                key,
            ))
        }
    }
}

/// Always-failing generator used when no LLM endpoint is configured.
pub struct DisabledTextGenerator;

#[async_trait]
impl TextGenerator for DisabledTextGenerator {
    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, PodgraphError> {
        Err(PodgraphError::Generation(
            "no text generator configured".into(),
        ))
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiCompatibleGenerator {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, PodgraphError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
        });

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PodgraphError::Generation(format!(
                "completion request failed with status {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                PodgraphError::Generation("completion response missing content".into())
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let generator = DisabledTextGenerator;
        let result = generator.generate("label this", 0.2).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_generator_config_toml() {
        let toml_src = r#"
            provider = "open_ai_compatible"
            endpoint = "http://localhost:8080/v1"
            model = "local-model"
        "#;
        let config: GeneratorConfig = toml::from_str(toml_src).unwrap();
        match config {
            GeneratorConfig::OpenAiCompatible {
                endpoint,
                model,
                api_key,
            } => {
                assert_eq!(endpoint, "http://localhost:8080/v1");
                assert_eq!(model, "local-model");
                assert!(api_key.is_none());
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_generator_config_default_is_disabled() {
        assert!(matches!(GeneratorConfig::default(), GeneratorConfig::Disabled));
    }
}
