// Vector store abstraction
// One contract over the embedded LanceDB store and the managed cloud index

#[cfg(test)]
mod tests;

pub mod cloud;
pub mod filter;
pub mod lancedb;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{Config, VectorBackendKind};
use crate::models::{Metadata, VectorRecord};
use crate::{BidMatchError, Result};

pub use cloud::CloudVectorBackend;
pub use filter::{FilterCondition, SearchFilters};
pub use lancedb::LocalVectorBackend;

const MAX_COLLECTION_NAME_LEN: usize = 64;

/// A stored vector scored against a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Matches of one query plus the number of records excluded for a dimension
/// disagreement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub matches: Vec<VectorMatch>,
    pub skipped_records: usize,
}

/// Aggregate outcome of a batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub upserted: usize,
    pub skipped: usize,
}

/// Uniform CRUD and similarity search over named collections of vectors
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Short backend name for logs and status output
    fn backend_name(&self) -> &'static str;

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Insert or fully replace records by id.
    ///
    /// Records of the wrong dimension are skipped and counted; if nothing in
    /// the batch can be written the call fails with `DimensionMismatch` and the
    /// collection is left untouched.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<UpsertSummary>;

    /// Most similar records first, ties broken by ascending id
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<QueryResult>;

    async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>>;

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Health probe; never fails
    async fn is_connected(&self) -> bool;
}

/// Collection names double as table names and namespaces, so keep them to a
/// charset every backend accepts
#[inline]
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let starts_alphanumeric = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());

    if name.len() > MAX_COLLECTION_NAME_LEN || !valid_chars || !starts_alphanumeric {
        return Err(BidMatchError::InvalidArgument(format!(
            "invalid collection name '{}': expected 1-{} characters of [A-Za-z0-9_-] starting with a letter or digit",
            name, MAX_COLLECTION_NAME_LEN
        )));
    }
    Ok(())
}

/// Sort by descending score, then ascending id, and keep the best `top_k`
#[inline]
pub fn rank_matches(mut matches: Vec<VectorMatch>, top_k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(top_k);
    matches
}

/// Split a batch into records of the expected dimension and a skip count.
///
/// Later duplicates of an id replace earlier ones.
pub(crate) fn partition_by_dimension(
    records: Vec<VectorRecord>,
    dimension: usize,
) -> (Vec<VectorRecord>, usize) {
    let mut accepted: Vec<VectorRecord> = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        if record.values.len() != dimension {
            tracing::warn!(
                "Skipping record {}: dimension {} does not match collection dimension {}",
                record.id,
                record.values.len(),
                dimension
            );
            skipped += 1;
            continue;
        }
        if let Some(existing) = accepted.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            accepted.push(record);
        }
    }

    (accepted, skipped)
}

/// Construct the backend selected by configuration
#[inline]
pub async fn create_vector_store(config: &Config) -> Result<Arc<dyn VectorStoreAdapter>> {
    let store: Arc<dyn VectorStoreAdapter> = match config.vector_store.backend {
        VectorBackendKind::Local => Arc::new(LocalVectorBackend::new(config).await?),
        VectorBackendKind::Cloud => Arc::new(CloudVectorBackend::new(config)?),
    };
    info!("Vector store backend selected: {}", store.backend_name());
    Ok(store)
}

/// Lazily constructs the configured backend exactly once.
///
/// The backend is fixed for the lifetime of the factory; switching backends
/// means building a new process.
pub struct VectorStoreFactory {
    config: Config,
    store: OnceCell<Arc<dyn VectorStoreAdapter>>,
}

impl VectorStoreFactory {
    #[inline]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    #[inline]
    pub async fn get(&self) -> Result<Arc<dyn VectorStoreAdapter>> {
        self.store
            .get_or_try_init(|| create_vector_store(&self.config))
            .await
            .map(Arc::clone)
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.store.initialized()
    }
}
