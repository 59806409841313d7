// Process-wide components
// Built once at startup and handed out as shared handles


use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::cache::CacheLayer;
use crate::config::Config;
use crate::embeddings::EmbeddingService;
use crate::matching::MatchingEngine;
use crate::rate_limit::RateLimiter;
use crate::realtime::{AlertNotifier, LogNotifier, RealTimeMatcher};
use crate::vector_store::{VectorStoreAdapter, VectorStoreFactory};

/// The single instances of every long-lived component.
///
/// Construct with [`Services::initialize`] and call [`Services::shutdown`]
/// before exit.
pub struct Services {
    config: Config,
    cache: Arc<CacheLayer>,
    embeddings: Arc<EmbeddingService>,
    vector_store: Arc<dyn VectorStoreAdapter>,
    engine: Arc<MatchingEngine>,
    matcher: Arc<RealTimeMatcher>,
    rate_limiter: Arc<RateLimiter>,
    sweeper_cancel: CancellationToken,
    sweepers: Vec<JoinHandle<()>>,
}

impl Services {
    /// Validate configuration and build every component with log notifications
    #[inline]
    pub async fn initialize(config: Config) -> Result<Self> {
        Self::initialize_with_notifier(config, Arc::new(LogNotifier)).await
    }

    #[inline]
    pub async fn initialize_with_notifier(
        config: Config,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(CacheLayer::from_config(&config.cache));
        let embeddings = Arc::new(EmbeddingService::from_config(&config, Arc::clone(&cache))?);
        let vector_store = VectorStoreFactory::new(config.clone()).get().await?;
        let engine = Arc::new(MatchingEngine::new(
            Arc::clone(&vector_store),
            Arc::clone(&embeddings),
            Arc::clone(&cache),
            config.matching.clone(),
        ));
        let matcher = Arc::new(RealTimeMatcher::new(
            Arc::clone(&engine),
            notifier,
            config.matcher.clone(),
        )?);
        let rate_limiter = Arc::new(RateLimiter::from_config(&config)?);

        let sweeper_cancel = CancellationToken::new();
        let mut sweepers = Vec::new();
        if config.cache.sweep_interval_seconds > 0 {
            sweepers.push(cache.spawn_sweeper(
                Duration::from_secs(config.cache.sweep_interval_seconds),
                sweeper_cancel.clone(),
            ));
        }
        if let Some(interval) = rate_limiter.sweep_interval() {
            sweepers.push(rate_limiter.spawn_sweeper(interval, sweeper_cancel.clone()));
        }

        info!(
            "Services initialized: {} embeddings ({}), {} vector store",
            embeddings.provider_name(),
            embeddings.model(),
            vector_store.backend_name()
        );

        Ok(Self {
            config,
            cache,
            embeddings,
            vector_store,
            engine,
            matcher,
            rate_limiter,
            sweeper_cancel,
            sweepers,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    #[inline]
    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    #[inline]
    pub fn vector_store(&self) -> &Arc<dyn VectorStoreAdapter> {
        &self.vector_store
    }

    #[inline]
    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    #[inline]
    pub fn matcher(&self) -> &Arc<RealTimeMatcher> {
        &self.matcher
    }

    #[inline]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Stop the matcher and background sweepers, waiting for all of them
    #[inline]
    pub async fn shutdown(mut self) {
        self.matcher.shutdown().await;
        self.sweeper_cancel.cancel();
        for handle in self.sweepers.drain(..) {
            if let Err(e) = handle.await {
                warn!("Sweeper ended abnormally: {}", e);
            }
        }
        info!("Services shut down");
    }
}

impl Drop for Services {
    #[inline]
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
    }
}
