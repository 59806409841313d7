#[cfg(test)]
mod tests;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    QueryResult, SearchFilters, UpsertSummary, VectorMatch, VectorStoreAdapter,
    partition_by_dimension, rank_matches, validate_collection_name,
};
use crate::config::Config;
use crate::models::{Metadata, VectorRecord};
use crate::{BidMatchError, Result};

const MIN_OVERFETCH: usize = 16;

/// Embedded LanceDB store, one table per collection
pub struct LocalVectorBackend {
    connection: Connection,
    db_path: PathBuf,
    default_dimension: usize,
    write_lock: Mutex<()>,
}

impl LocalVectorBackend {
    /// Open (or create) the database under `<base_dir>/vectors`
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = config.vector_database_path();
        Self::open(&db_path, config.embedding_dimension()).await
    }

    #[inline]
    pub async fn open(db_path: &Path, default_dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {}", db_path.display());

        std::fs::create_dir_all(db_path)?;

        let uri = format!("file://{}", db_path.display());

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                if looks_corrupted(&e.to_string()) {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        unavailable("Failed to connect to LanceDB after recovery", e)
                    })?
                } else {
                    return Err(unavailable("Failed to connect to LanceDB", e));
                }
            }
        };

        info!("Local vector store initialized at {}", db_path.display());
        Ok(Self {
            connection,
            db_path: db_path.to_path_buf(),
            default_dimension,
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Compact fragments and prune old versions of a collection
    #[inline]
    pub async fn optimize(&self, collection: &str) -> Result<()> {
        let table = self.require_table(collection).await?;
        let _guard = self.write_lock.lock().await;

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| unavailable("Failed to optimize table", e))?;

        info!("Optimized collection {}", collection);
        Ok(())
    }

    /// Build an ANN index on the vector column.
    ///
    /// LanceDB needs a few hundred rows before it will train one.
    #[inline]
    pub async fn create_vector_index(&self, collection: &str) -> Result<()> {
        let table = self.require_table(collection).await?;

        table
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| unavailable("Failed to create vector index", e))?;

        info!("Vector index created for {}", collection);
        Ok(())
    }

    /// Number of records in a collection; a missing collection counts as empty
    #[inline]
    pub async fn count(&self, collection: &str) -> Result<usize> {
        match self.open_existing(collection).await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(|e| unavailable("Failed to count rows", e)),
            None => Ok(0),
        }
    }

    async fn open_existing(&self, name: &str) -> Result<Option<Table>> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| unavailable("Failed to list tables", e))?;

        if !table_names.iter().any(|t| t == name) {
            return Ok(None);
        }

        self.connection
            .open_table(name)
            .execute()
            .await
            .map(Some)
            .map_err(|e| unavailable("Failed to open table", e))
    }

    async fn require_table(&self, name: &str) -> Result<Table> {
        self.open_existing(name)
            .await?
            .ok_or_else(|| BidMatchError::NotFound(format!("collection '{}'", name)))
    }

    async fn create_table(&self, name: &str, dimension: usize) -> Result<Table> {
        info!(
            "Creating collection {} with {} dimensions",
            name, dimension
        );
        self.connection
            .create_empty_table(name, create_schema(dimension))
            .execute()
            .await
            .map_err(|e| unavailable("Failed to create table", e))
    }

    fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
        warn!("Attempting database corruption recovery at {}", db_path.display());

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {}", backup_path.display());
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path)?;
        }
        std::fs::create_dir_all(db_path)?;

        info!("Database corruption recovery completed");
        Ok(())
    }
}

#[async_trait]
impl VectorStoreAdapter for LocalVectorBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        validate_collection_name(name)?;
        if dimension == 0 {
            return Err(BidMatchError::InvalidArgument(
                "collection dimension must be positive".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        if self.open_existing(name).await?.is_some() {
            return Err(BidMatchError::AlreadyExists(format!("collection '{}'", name)));
        }
        self.create_table(name, dimension).await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let _guard = self.write_lock.lock().await;
        self.require_table(name).await?;

        info!("Dropping collection {}", name);
        self.connection
            .drop_table(name)
            .await
            .map_err(|e| unavailable("Failed to drop table", e))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| unavailable("Failed to list tables", e))?;
        names.sort();
        Ok(names)
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<UpsertSummary> {
        validate_collection_name(collection)?;
        if records.is_empty() {
            debug!("No records to upsert into {}", collection);
            return Ok(UpsertSummary::default());
        }

        let _guard = self.write_lock.lock().await;

        let table = match self.open_existing(collection).await? {
            Some(table) => table,
            None => self.create_table(collection, self.default_dimension).await?,
        };
        let dimension = detect_dimension(&table).await?;

        let first_len = records.first().map_or(0, |r| r.values.len());
        let (accepted, skipped) = partition_by_dimension(records, dimension);
        if accepted.is_empty() {
            return Err(BidMatchError::DimensionMismatch {
                expected: dimension,
                actual: first_len,
            });
        }

        // One commit: readers see either the old or the new version of a record
        let record_batch = create_record_batch(&accepted, dimension)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| unavailable("Failed to upsert records", e))?;

        info!(
            "Upserted {} records into {} ({} skipped)",
            accepted.len(),
            collection,
            skipped
        );
        Ok(UpsertSummary {
            upserted: accepted.len(),
            skipped,
        })
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<QueryResult> {
        validate_collection_name(collection)?;
        let Some(table) = self.open_existing(collection).await? else {
            debug!("Query against missing collection {}", collection);
            return Ok(QueryResult::default());
        };

        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| unavailable("Failed to count rows", e))?;
        if row_count == 0 || top_k == 0 {
            return Ok(QueryResult::default());
        }

        let dimension = detect_dimension(&table).await?;
        if vector.len() != dimension {
            warn!(
                "Query vector has {} dimensions but {} stores {}; {} records skipped",
                vector.len(),
                collection,
                dimension,
                row_count
            );
            return Ok(QueryResult {
                matches: Vec::new(),
                skipped_records: row_count,
            });
        }

        let limit = if filters.is_empty() {
            (top_k * 2).max(top_k + MIN_OVERFETCH).min(row_count)
        } else {
            row_count
        };

        let mut candidates = search_candidates(&table, vector, limit).await?;
        if limit < row_count && cutoff_is_tied(&candidates, top_k) {
            // LanceDB picks arbitrarily among rows tied at the cut-off
            debug!(
                "Scores tied at the fetch limit on {}; rescanning all {} rows",
                collection, row_count
            );
            candidates = search_candidates(&table, vector, row_count).await?;
        }

        let matches: Vec<VectorMatch> = candidates
            .into_iter()
            .filter(|candidate| filters.matches(&candidate.metadata))
            .collect();

        debug!(
            "Query on {} produced {} candidates after filtering",
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
        let Some(table) = self.open_existing(collection).await? else {
            return Ok(None);
        };

        let results = table
            .query()
            .only_if(id_predicate(&[id]))
            .limit(1)
            .execute()
            .await
            .map_err(|e| unavailable("Failed to execute lookup", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| unavailable("Failed to read result stream", e))?;

        for batch in &batches {
            if let Some(record) = parse_records(batch)?.into_iter().next() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        validate_collection_name(collection)?;
        let table = self.require_table(collection).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        table
            .delete(&id_predicate(&id_refs))
            .await
            .map_err(|e| unavailable("Failed to delete records", e))?;

        debug!("Deleted {} ids from {}", ids.len(), collection);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connection.table_names().execute().await.is_ok()
    }
}

/// Nearest `limit` rows by cosine distance, unfiltered
async fn search_candidates(table: &Table, vector: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
    let results = table
        .vector_search(vector)
        .map_err(|e| unavailable("Failed to create vector search", e))?
        .column("vector")
        .distance_type(DistanceType::Cosine)
        .limit(limit)
        .execute()
        .await
        .map_err(|e| unavailable("Failed to execute search", e))?;

    let batches: Vec<RecordBatch> = results
        .try_collect()
        .await
        .map_err(|e| unavailable("Failed to read result stream", e))?;

    let mut candidates = Vec::new();
    for batch in &batches {
        candidates.extend(parse_search_batch(batch)?);
    }
    Ok(candidates)
}

/// Whether the weakest fetched row scores the same as the `top_k`-th best,
/// meaning rows left out by the limit could belong in the result
pub(crate) fn cutoff_is_tied(candidates: &[VectorMatch], top_k: usize) -> bool {
    let mut scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    match (scores.get(top_k.saturating_sub(1)), scores.last()) {
        (Some(kth), Some(weakest)) => weakest >= kth,
        _ => false,
    }
}

fn unavailable(context: &str, error: impl Display) -> BidMatchError {
    BidMatchError::BackendUnavailable(format!("{}: {}", context, error))
}

fn looks_corrupted(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("corrupt") || message.contains("invalid") || message.contains("malformed")
}

/// Schema of a collection table with the given vector dimension
pub(crate) fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("metadata", DataType::Utf8, false),
    ]))
}

async fn detect_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| unavailable("Failed to get table schema", e))?;

    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| {
            BidMatchError::BackendUnavailable(
                "Could not find vector column or determine dimension".to_string(),
            )
        })
}

/// SQL predicate matching any of `ids`, with single quotes escaped
pub(crate) fn id_predicate(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("id IN ({})", quoted.join(", "))
}

pub(crate) fn create_record_batch(records: &[VectorRecord], dimension: usize) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(records.len());
    let mut flat_values = Vec::with_capacity(records.len() * dimension);
    let mut metadata = Vec::with_capacity(records.len());

    for record in records {
        ids.push(record.id.as_str());
        flat_values.extend_from_slice(&record.values);
        metadata.push(serde_json::to_string(&record.metadata)?);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| unavailable("Failed to create vector array", e))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(metadata)),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| unavailable("Failed to create record batch", e))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| unavailable("Missing column", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| unavailable("Invalid column type", name))
}

fn parse_metadata(id: &str, raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Unreadable metadata on record {}: {}", id, e);
        Metadata::new()
    })
}

pub(crate) fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<VectorMatch>> {
    let ids = string_column(batch, "id")?;
    let metadata = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut matches = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let id = ids.value(row);
        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        matches.push(VectorMatch {
            id: id.to_string(),
            score: 1.0 - distance,
            metadata: parse_metadata(id, metadata.value(row)),
        });
    }
    Ok(matches)
}

fn parse_records(batch: &RecordBatch) -> Result<Vec<VectorRecord>> {
    let ids = string_column(batch, "id")?;
    let metadata = string_column(batch, "metadata")?;
    let vectors = batch
        .column_by_name("vector")
        .ok_or_else(|| unavailable("Missing column", "vector"))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| unavailable("Invalid column type", "vector"))?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let id = ids.value(row);
        let values_ref = vectors.value(row);
        let values = values_ref
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| unavailable("Invalid vector item type", id))?
            .values()
            .to_vec();

        records.push(VectorRecord {
            id: id.to_string(),
            values,
            metadata: parse_metadata(id, metadata.value(row)),
        });
    }
    Ok(records)
}
