
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::http::HttpClient;
use crate::{BidMatchError, Result};

/// Embedding client for a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: HttpClient,
    model: String,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.ollama_url()?;

        Ok(Self {
            client: HttpClient::new(base_url, config.timeout()),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1) as usize,
        })
    }

    #[inline]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// List all models the server has pulled
    #[inline]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        debug!("Fetching available models from {}", self.client.base_url());
        let response: ModelsResponse = self.client.get_json("/api/tags", &[]).await?;
        debug!("Found {} models", response.models.len());
        Ok(response.models)
    }

    /// Validate that the configured model is available
    #[inline]
    pub async fn validate_model(&self) -> Result<()> {
        let models = self.list_models().await?;

        if models.iter().any(|m| model_matches(&m.name, &self.model)) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            Err(BidMatchError::NotFound(format!(
                "model '{}' is not available; available models: {:?}",
                self.model, available
            )))
        }
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response: EmbedResponse = self
            .client
            .post_json(
                "/api/embed",
                &EmbedRequest {
                    model: &self.model,
                    input: texts,
                },
            )
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(BidMatchError::BackendUnavailable(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

/// Ollama reports `name:tag`; a configured name without a tag means `latest`
fn model_matches(available: &str, configured: &str) -> bool {
    available == configured
        || (!configured.contains(':') && available == format!("{configured}:latest"))
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());
        self.embed_chunk(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| BidMatchError::BackendUnavailable("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            results.extend(self.embed_chunk(chunk).await?);
        }
        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    async fn health_check(&self) -> Result<()> {
        self.validate_model().await?;
        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.client.base_url(),
            self.model
        );
        Ok(())
    }
}
