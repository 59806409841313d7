// Embeddings module
// Text to fixed-dimension vectors through a pluggable provider, cached by
// provider, model and text


pub mod fallback;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CachedValue, embedding_key};
use crate::config::{Config, EmbeddingProviderKind};
use crate::{BidMatchError, Result, with_timeout};

pub use fallback::{HashEmbedder, hash_embedding};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Source of embedding vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, part of the embedding cache key
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    async fn health_check(&self) -> Result<()>;
}

/// Build the provider selected by `embedding.provider`
#[inline]
pub fn create_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingProviderKind::Ollama => Arc::new(OllamaClient::new(&config.embedding)?),
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiClient::new(&config.embedding)?),
        EmbeddingProviderKind::Hash => Arc::new(HashEmbedder::new(config.embedding_dimension())),
    };
    info!(
        "Embedding provider selected: {} ({})",
        provider.name(),
        provider.model()
    );
    Ok(provider)
}

/// Embeds text at the deployment dimension, consulting the cache first
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    cache: Arc<CacheLayer>,
    timeout: Duration,
}

impl EmbeddingService {
    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimension: usize,
        cache: Arc<CacheLayer>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            dimension,
            cache,
            timeout,
        }
    }

    #[inline]
    pub fn from_config(config: &Config, cache: Arc<CacheLayer>) -> Result<Self> {
        Ok(Self::new(
            create_provider(config)?,
            config.embedding_dimension(),
            cache,
            config.embedding.timeout(),
        ))
    }

    #[inline]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    #[inline]
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(BidMatchError::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }

        let key = embedding_key(self.provider.name(), self.provider.model(), text);
        if let Some(values) = self.cache.get_embedding(&key) {
            debug!("Embedding cache hit for text (length: {})", text.len());
            return Ok(values);
        }

        let values = with_timeout(self.timeout, "embedding", self.provider.embed(text)).await?;
        self.check_dimension(&values)?;

        self.cache.insert(key, CachedValue::Embedding(values.clone()));
        Ok(values)
    }

    /// Embed several texts, sending only cache misses to the provider
    #[inline]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(empty) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(BidMatchError::InvalidArgument(format!(
                "cannot embed empty text at position {}",
                empty
            )));
        }

        let keys: Vec<String> = texts
            .iter()
            .map(|t| embedding_key(self.provider.name(), self.provider.model(), t))
            .collect();
        let mut results: Vec<Option<Vec<f32>>> =
            keys.iter().map(|k| self.cache.get_embedding(k)).collect();

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !missing.is_empty() {
            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let embedded = with_timeout(
                self.timeout,
                "batch embedding",
                self.provider.embed_batch(&pending),
            )
            .await?;

            if embedded.len() != pending.len() {
                return Err(BidMatchError::BackendUnavailable(format!(
                    "provider returned {} embeddings for {} texts",
                    embedded.len(),
                    pending.len()
                )));
            }

            for (index, values) in missing.into_iter().zip(embedded) {
                self.check_dimension(&values)?;
                self.cache
                    .insert(keys[index].clone(), CachedValue::Embedding(values.clone()));
                results[index] = Some(values);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    #[inline]
    pub async fn health_check(&self) -> Result<()> {
        with_timeout(self.timeout, "embedding health check", self.provider.health_check()).await
    }

    fn check_dimension(&self, values: &[f32]) -> Result<()> {
        if values.len() == self.dimension {
            Ok(())
        } else {
            Err(BidMatchError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            })
        }
    }
}
