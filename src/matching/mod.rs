// Similarity matching
// Query mode (free text or a raw vector) and profile mode, both over the
// configured vector store with the search cache in front

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CachedValue, SEARCH_PREFIX, search_key};
use crate::config::MatchingConfig;
use crate::embeddings::EmbeddingService;
use crate::models::{
    CompanyProfile, DATE_FORMAT, MatchResult, MetadataValue, OPPORTUNITY_TYPE, Opportunity,
    SearchOutcome,
};
use crate::vector_store::{
    SearchFilters, UpsertSummary, VectorStoreAdapter, validate_collection_name,
};
use crate::{BidMatchError, Result, with_timeout};

pub const MAX_TOP_K: usize = 1000;

/// What to search with
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Vector(Vec<f32>),
    Text(String),
}

/// Inclusive date window over a `YYYY-MM-DD` metadata field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default = "default_date_field")]
    pub field: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn default_date_field() -> String {
    "responseDeadline".to_string()
}

/// Domain filters accepted by the matching API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchFilters {
    pub record_type: Option<String>,
    pub naics_codes: Vec<String>,
    pub tags: Vec<String>,
    pub date_range: Option<DateRange>,
}

impl MatchFilters {
    #[inline]
    pub fn to_search_filters(&self) -> SearchFilters {
        let mut filters = SearchFilters::new();

        if let Some(record_type) = &self.record_type {
            filters = filters.eq("type", record_type.as_str());
        }
        if !self.naics_codes.is_empty() {
            filters = filters.any_of(
                "naicsCode",
                self.naics_codes
                    .iter()
                    .map(|c| MetadataValue::from(c.as_str()))
                    .collect(),
            );
        }
        if !self.tags.is_empty() {
            filters = filters.any_of(
                "tags",
                self.tags
                    .iter()
                    .map(|t| MetadataValue::from(t.as_str()))
                    .collect(),
            );
        }
        if let Some(range) = &self.date_range {
            let bound =
                |date: Option<NaiveDate>| date.map(|d| MetadataValue::from(d.format(DATE_FORMAT).to_string()));
            filters = filters.range(range.field.as_str(), bound(range.from), bound(range.to));
        }

        filters
    }
}

pub struct MatchingEngine {
    store: Arc<dyn VectorStoreAdapter>,
    embeddings: Arc<EmbeddingService>,
    cache: Arc<CacheLayer>,
    config: MatchingConfig,
}

impl MatchingEngine {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStoreAdapter>,
        embeddings: Arc<EmbeddingService>,
        cache: Arc<CacheLayer>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            cache,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn VectorStoreAdapter> {
        &self.store
    }

    #[inline]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    #[inline]
    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    /// Rank records of `collection` against free text or a vector
    #[inline]
    pub async fn query(
        &self,
        input: QueryInput,
        collection: &str,
        top_k: usize,
        filters: &MatchFilters,
    ) -> Result<SearchOutcome> {
        validate_top_k(top_k)?;
        validate_collection_name(collection)?;

        let vector = match input {
            QueryInput::Vector(vector) if vector.is_empty() => {
                return Err(BidMatchError::InvalidArgument(
                    "query vector is empty".to_string(),
                ));
            }
            QueryInput::Vector(vector) => vector,
            QueryInput::Text(text) => self.embeddings.embed(&text).await?,
        };

        self.search_vector(&vector, collection, top_k, &filters.to_search_filters())
            .await
    }

    /// Opportunities most similar to a company profile
    #[inline]
    pub async fn match_profile(
        &self,
        profile: &CompanyProfile,
        top_k: usize,
        filters: &MatchFilters,
    ) -> Result<SearchOutcome> {
        validate_top_k(top_k)?;

        let text = profile.capability_text();
        if text.trim().is_empty() {
            return Err(BidMatchError::InvalidArgument(format!(
                "profile '{}' has no capability text to match on",
                profile.id
            )));
        }

        let filters = MatchFilters {
            record_type: Some(OPPORTUNITY_TYPE.to_string()),
            ..filters.clone()
        };

        debug!("Matching profile {} against opportunities", profile.id);
        self.query(
            QueryInput::Text(text),
            &self.config.opportunities_collection,
            top_k,
            &filters,
        )
        .await
    }

    /// Embed a profile and store it in the profiles collection
    #[inline]
    pub async fn add_company_profile(&self, profile: &CompanyProfile) -> Result<()> {
        if profile.id.trim().is_empty() {
            return Err(BidMatchError::InvalidArgument(
                "profile id is empty".to_string(),
            ));
        }

        let values = self.embeddings.embed(&profile.capability_text()).await?;
        let collection = &self.config.profiles_collection;
        with_timeout(
            self.config.call_timeout(),
            "profile upsert",
            self.store.upsert(collection, vec![profile.to_record(values)]),
        )
        .await?;

        self.invalidate_searches();
        info!("Stored company profile {} in {}", profile.id, collection);
        Ok(())
    }

    /// Embed opportunities and upsert them as one batch
    #[inline]
    pub async fn add_opportunities(&self, opportunities: &[Opportunity]) -> Result<UpsertSummary> {
        if opportunities.is_empty() {
            return Ok(UpsertSummary::default());
        }
        if let Some(bad) = opportunities.iter().find(|o| o.id.trim().is_empty()) {
            return Err(BidMatchError::InvalidArgument(format!(
                "opportunity '{}' has an empty id",
                bad.title
            )));
        }

        let texts: Vec<String> = opportunities.iter().map(Opportunity::embedding_text).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        let records = opportunities
            .iter()
            .zip(vectors)
            .map(|(opportunity, values)| opportunity.to_record(values))
            .collect();

        let collection = &self.config.opportunities_collection;
        let summary = with_timeout(
            self.config.call_timeout(),
            "opportunity upsert",
            self.store.upsert(collection, records),
        )
        .await?;

        self.invalidate_searches();
        info!(
            "Stored {} opportunities in {} ({} skipped)",
            summary.upserted, collection, summary.skipped
        );
        Ok(summary)
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        collection: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<SearchOutcome> {
        let key = search_key(vector, collection, top_k, filters);
        if let Some(mut outcome) = self.cache.get_search(&key) {
            debug!("Search cache hit for {}", collection);
            outcome.from_cache = true;
            return Ok(outcome);
        }

        let raw = with_timeout(
            self.config.call_timeout(),
            "vector query",
            self.store.query(collection, vector, top_k, filters),
        )
        .await?;

        if raw.skipped_records > 0 {
            warn!(
                "{} records in {} were skipped for a dimension mismatch",
                raw.skipped_records, collection
            );
        }

        let results: Vec<MatchResult> = raw
            .matches
            .into_iter()
            .map(|m| MatchResult {
                opportunity: Opportunity::from_metadata(&m.id, &m.metadata),
                score: m.score,
            })
            .collect();
        let outcome = SearchOutcome::new(results, raw.skipped_records);

        if !outcome.results.is_empty() {
            self.cache.insert(key, CachedValue::Search(outcome.clone()));
        }
        Ok(outcome)
    }

    fn invalidate_searches(&self) {
        let cleared = self.cache.clear_by_prefix(SEARCH_PREFIX);
        if cleared > 0 {
            debug!("Invalidated {} cached searches after a write", cleared);
        }
    }
}

fn validate_top_k(top_k: usize) -> Result<()> {
    if (1..=MAX_TOP_K).contains(&top_k) {
        Ok(())
    } else {
        Err(BidMatchError::InvalidArgument(format!(
            "top_k must be between 1 and {}, got {}",
            MAX_TOP_K, top_k
        )))
    }
}
