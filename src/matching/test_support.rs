use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use super::MatchingEngine;
use crate::Result;
use crate::cache::{CacheLayer, NamespaceTtls, SEARCH_PREFIX};
use crate::config::MatchingConfig;
use crate::embeddings::{EmbeddingProvider, EmbeddingService, hash_embedding};
use crate::models::{CompanyProfile, Metadata, OPPORTUNITY_TYPE, VectorRecord};
use crate::vector_store::{LocalVectorBackend, VectorStoreAdapter};

pub(crate) const DIMENSION: usize = 3;

/// Returns pinned vectors for known texts and hashes everything else
pub(crate) struct FixedProvider {
    vectors: HashMap<String, Vec<f32>>,
    pub(crate) calls: AtomicUsize,
}

impl FixedProvider {
    pub(crate) fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn model(&self) -> &str {
        "fixed-test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| hash_embedding(text, DIMENSION)))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct TestEngine {
    pub(crate) engine: Arc<MatchingEngine>,
    pub(crate) store: Arc<LocalVectorBackend>,
    pub(crate) provider: Arc<FixedProvider>,
    _temp_dir: TempDir,
}

impl TestEngine {
    /// Write records straight to the store, dropping stale cached searches
    pub(crate) async fn seed(&self, collection: &str, records: Vec<VectorRecord>) {
        self.store
            .upsert(collection, records)
            .await
            .expect("should seed records");
        self.engine.cache().clear_by_prefix(SEARCH_PREFIX);
    }
}

pub(crate) async fn local_engine(provider: FixedProvider, cache_enabled: bool) -> TestEngine {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = Arc::new(
        LocalVectorBackend::open(&temp_dir.path().join("vectors"), DIMENSION)
            .await
            .expect("should open local backend"),
    );
    let provider = Arc::new(provider);
    let engine = engine_over(
        Arc::clone(&store) as Arc<dyn VectorStoreAdapter>,
        Arc::clone(&provider),
        cache_enabled,
    );

    TestEngine {
        engine,
        store,
        provider,
        _temp_dir: temp_dir,
    }
}

/// An engine with default matching settings over any store
pub(crate) fn engine_over(
    store: Arc<dyn VectorStoreAdapter>,
    provider: Arc<FixedProvider>,
    cache_enabled: bool,
) -> Arc<MatchingEngine> {
    let cache = Arc::new(CacheLayer::new(NamespaceTtls::default(), cache_enabled));
    let embeddings = Arc::new(EmbeddingService::new(
        provider as Arc<dyn EmbeddingProvider>,
        DIMENSION,
        Arc::clone(&cache),
        Duration::from_secs(5),
    ));
    Arc::new(MatchingEngine::new(
        store,
        embeddings,
        cache,
        MatchingConfig::default(),
    ))
}

pub(crate) fn profile(id: &str) -> CompanyProfile {
    CompanyProfile {
        id: id.to_string(),
        name: format!("Company {id}"),
        description: "Cloud migration and cybersecurity".to_string(),
        naics_codes: vec!["541511".to_string()],
        capabilities: vec!["cloud".to_string(), "devsecops".to_string()],
        ..CompanyProfile::default()
    }
}

/// Unit vector whose cosine similarity with `[1, 0, 0]` is `score`
pub(crate) fn vector_with_score(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).max(0.0).sqrt(), 0.0]
}

pub(crate) fn opportunity_record(id: &str, score: f32) -> VectorRecord {
    let mut metadata = Metadata::new();
    metadata.insert("type".to_string(), OPPORTUNITY_TYPE.into());
    metadata.insert("title".to_string(), format!("Opportunity {id}").into());
    metadata.insert("naicsCode".to_string(), "541511".into());
    VectorRecord::new(id, vector_with_score(score), metadata)
}

/// A provider that embeds `profile`'s capability text as `[1, 0, 0]`
pub(crate) fn provider_for(profile: &CompanyProfile) -> FixedProvider {
    FixedProvider::new().with(profile.capability_text(), vec![1.0, 0.0, 0.0])
}
