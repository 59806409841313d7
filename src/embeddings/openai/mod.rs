
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::EmbeddingProvider;
use crate::config::{ConfigError, EmbeddingConfig};
use crate::http::HttpClient;
use crate::{BidMatchError, Result};

/// Embedding client for the OpenAI embeddings API or a compatible server
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: HttpClient,
    model: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|_| ConfigError::InvalidUrl(config.base_url.clone()))?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey("the OpenAI embedding provider"))?;

        let client = HttpClient::new(base_url, config.timeout())
            .with_header("Authorization", format!("Bearer {api_key}"));

        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            batch_size: config.batch_size.max(1) as usize,
        })
    }

    #[inline]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response: EmbeddingResponse = self
            .client
            .post_json(
                "/v1/embeddings",
                &EmbeddingRequest {
                    model: &self.model,
                    input: texts,
                    dimensions: self.dimension,
                },
            )
            .await?;

        if response.data.len() != texts.len() {
            return Err(BidMatchError::BackendUnavailable(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
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
        let path = format!("/v1/models/{}", self.model);
        let _: Value = self.client.get_json(&path, &[]).await?;
        info!("Health check passed for OpenAI model {}", self.model);
        Ok(())
    }
}
