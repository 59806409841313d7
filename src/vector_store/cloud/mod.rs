// Managed cloud index over a Pinecone-compatible REST data plane.
// Collections map to namespaces of a single fixed-dimension index.


use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    FilterCondition, QueryResult, SearchFilters, UpsertSummary, VectorMatch, VectorStoreAdapter,
    partition_by_dimension, rank_matches, validate_collection_name,
};
use crate::config::{Config, ConfigError};
use crate::http::HttpClient;
use crate::models::{Metadata, MetadataValue, VectorRecord};
use crate::{BidMatchError, Result};

const API_VERSION: &str = "2024-07";
const UPSERT_BATCH_SIZE: usize = 100;
const TEXT_RANGE_OVERFETCH: usize = 4;
const MAX_TOP_K: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
    #[serde(default)]
    dimension: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredVector>,
}

#[derive(Debug, Deserialize)]
struct ScoredVector {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

pub struct CloudVectorBackend {
    client: HttpClient,
    dimension: OnceCell<usize>,
    declared: Mutex<BTreeSet<String>>,
}

impl CloudVectorBackend {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let settings = &config.vector_store;
        let host = settings
            .index_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::MissingIndexHost)?;
        let base_url = Url::parse(host).map_err(|_| ConfigError::InvalidUrl(host.to_string()))?;
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey("the cloud vector store"))?;

        let client = HttpClient::new(base_url, settings.timeout())
            .with_retry_attempts(settings.retry_attempts)
            .with_header("Api-Key", api_key)
            .with_header("X-Pinecone-API-Version", API_VERSION);

        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client, e.g. one with a shorter backoff
    #[inline]
    pub fn with_client(client: HttpClient) -> Self {
        Self {
            client,
            dimension: OnceCell::new(),
            declared: Mutex::new(BTreeSet::new()),
        }
    }

    async fn describe_index_stats(&self) -> Result<IndexStats> {
        self.client
            .post_json("/describe_index_stats", &json!({}))
            .await
    }

    /// Dimension of the index, fetched once
    async fn index_dimension(&self) -> Result<usize> {
        self.dimension
            .get_or_try_init(|| async {
                let stats = self.describe_index_stats().await?;
                debug!("Cloud index dimension: {}", stats.dimension);
                Ok::<_, BidMatchError>(stats.dimension)
            })
            .await
            .copied()
    }

    fn is_declared(&self, name: &str) -> bool {
        self.declared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn declare(&self, name: &str) {
        self.declared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    fn forget(&self, name: &str) {
        self.declared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        if self.is_declared(name) {
            return Ok(true);
        }
        let stats = self.describe_index_stats().await?;
        Ok(stats.namespaces.contains_key(name))
    }

    async fn require_collection(&self, name: &str) -> Result<()> {
        if self.collection_exists(name).await? {
            Ok(())
        } else {
            Err(BidMatchError::NotFound(format!("collection '{}'", name)))
        }
    }
}

#[async_trait]
impl VectorStoreAdapter for CloudVectorBackend {
    fn backend_name(&self) -> &'static str {
        "cloud"
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        validate_collection_name(name)?;
        if dimension == 0 {
            return Err(BidMatchError::InvalidArgument(
                "collection dimension must be positive".to_string(),
            ));
        }

        let index_dimension = self.index_dimension().await?;
        if dimension != index_dimension {
            return Err(BidMatchError::Unsupported(format!(
                "the cloud index has a fixed dimension of {}, cannot create '{}' with {}",
                index_dimension, name, dimension
            )));
        }

        if self.collection_exists(name).await? {
            return Err(BidMatchError::AlreadyExists(format!("collection '{}'", name)));
        }

        self.declare(name);
        info!("Declared cloud namespace {}", name);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.require_collection(name).await?;

        let _: Value = self
            .client
            .post_json(
                "/vectors/delete",
                &json!({ "deleteAll": true, "namespace": name }),
            )
            .await?;
        self.forget(name);

        info!("Deleted cloud namespace {}", name);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let stats = self.describe_index_stats().await?;
        let mut names: BTreeSet<String> = stats
            .namespaces
            .into_keys()
            .filter(|name| !name.is_empty())
            .collect();
        names.extend(
            self.declared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        Ok(names.into_iter().collect())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<UpsertSummary> {
        validate_collection_name(collection)?;
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let dimension = self.index_dimension().await?;
        let first_len = records.first().map_or(0, |r| r.values.len());
        let (accepted, skipped) = partition_by_dimension(records, dimension);
        if accepted.is_empty() {
            return Err(BidMatchError::DimensionMismatch {
                expected: dimension,
                actual: first_len,
            });
        }

        let mut upserted = 0;
        for chunk in accepted.chunks(UPSERT_BATCH_SIZE) {
            let response: UpsertResponse = self
                .client
                .post_json(
                    "/vectors/upsert",
                    &UpsertRequest {
                        vectors: chunk,
                        namespace: collection,
                    },
                )
                .await?;
            if response.upserted_count != chunk.len() {
                warn!(
                    "Cloud index acknowledged {} of {} records",
                    response.upserted_count,
                    chunk.len()
                );
            }
            upserted += chunk.len();
        }
        self.declare(collection);

        info!(
            "Upserted {} records into cloud namespace {} ({} skipped)",
            upserted, collection, skipped
        );
        Ok(UpsertSummary { upserted, skipped })
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<QueryResult> {
        validate_collection_name(collection)?;
        if top_k == 0 {
            return Ok(QueryResult::default());
        }

        let dimension = self.index_dimension().await?;
        if vector.len() != dimension {
            let stats = self.describe_index_stats().await?;
            let skipped = stats
                .namespaces
                .get(collection)
                .map_or(0, |ns| ns.vector_count);
            warn!(
                "Query vector has {} dimensions but the cloud index stores {}; {} records skipped",
                vector.len(),
                dimension,
                skipped
            );
            return Ok(QueryResult {
                matches: Vec::new(),
                skipped_records: skipped,
            });
        }

        let post_filter = filters.has_text_range();
        let fetch_k = if post_filter {
            top_k.saturating_mul(TEXT_RANGE_OVERFETCH)
        } else {
            top_k
        }
        .min(MAX_TOP_K);

        let response: QueryResponse = self
            .client
            .post_json(
                "/query",
                &QueryRequest {
                    namespace: collection,
                    vector,
                    top_k: fetch_k,
                    include_metadata: true,
                    include_values: false,
                    filter: translate_filters(filters),
                },
            )
            .await?;

        let matches: Vec<VectorMatch> = response
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .filter(|m| !post_filter || filters.matches(&m.metadata))
            .collect();

        debug!(
            "Cloud query on {} returned {} matches",
            collection,
            matches.len()
        );
        Ok(QueryResult {
            matches: rank_matches(matches, top_k),
            skipped_records: 0,
        })
    }

    async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
        validate_collection_name(collection)?;
        let response: FetchResponse = match self
            .client
            .get_json("/vectors/fetch", &[("ids", id), ("namespace", collection)])
            .await
        {
            Ok(response) => response,
            Err(BidMatchError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(response.vectors.into_values().find(|v| v.id == id).map(|v| {
            VectorRecord {
                id: v.id,
                values: v.values,
                metadata: v.metadata.unwrap_or_default(),
            }
        }))
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        validate_collection_name(collection)?;
        self.require_collection(collection).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let _: Value = self
            .client
            .post_json(
                "/vectors/delete",
                &json!({ "ids": ids, "namespace": collection }),
            )
            .await?;
        debug!("Deleted {} ids from cloud namespace {}", ids.len(), collection);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.describe_index_stats().await.is_ok()
    }
}

/// Translate filters into the index's metadata filter language.
///
/// Text ranges have no server-side equivalent and are left for the caller to
/// apply after the query.
pub(crate) fn translate_filters(filters: &SearchFilters) -> Option<Value> {
    let mut clauses: Vec<Value> = filters
        .conditions()
        .iter()
        .filter(|c| !c.is_text_range())
        .map(translate_condition)
        .collect();

    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

fn translate_condition(condition: &FilterCondition) -> Value {
    let mut operators = Map::new();
    match condition {
        FilterCondition::Eq { value, .. } => match value {
            MetadataValue::List(items) => {
                operators.insert("$in".to_string(), json!(items));
            }
            other => {
                operators.insert("$eq".to_string(), json!(other));
            }
        },
        FilterCondition::In { values, .. } => {
            let flattened: Vec<Value> = values
                .iter()
                .flat_map(|v| match v {
                    MetadataValue::List(items) => items.iter().map(|i| json!(i)).collect(),
                    other => vec![json!(other)],
                })
                .collect();
            operators.insert("$in".to_string(), Value::Array(flattened));
        }
        FilterCondition::Range { gte, lte, .. } => {
            if let Some(bound) = gte {
                operators.insert("$gte".to_string(), json!(bound));
            }
            if let Some(bound) = lte {
                operators.insert("$lte".to_string(), json!(bound));
            }
        }
    }

    let mut clause = BTreeMap::new();
    clause.insert(condition.field().to_string(), Value::Object(operators));
    json!(clause)
}
