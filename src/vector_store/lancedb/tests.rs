use super::*;
use crate::models::MetadataValue;
use std::time::Duration;
use tempfile::TempDir;

async fn create_test_backend(dimension: usize) -> (LocalVectorBackend, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let backend = LocalVectorBackend::open(&temp_dir.path().join("vectors"), dimension)
        .await
        .expect("should open local backend");
    (backend, temp_dir)
}

fn record(id: &str, values: Vec<f32>, kind: &str) -> VectorRecord {
    let mut metadata = Metadata::new();
    metadata.insert("type".to_string(), MetadataValue::from(kind));
    metadata.insert("title".to_string(), MetadataValue::from(format!("Title {id}")));
    VectorRecord::new(id, values, metadata)
}

#[tokio::test]
async fn backend_initialization() {
    let (backend, temp_dir) = create_test_backend(3).await;
    assert_eq!(backend.backend_name(), "local");
    assert_eq!(backend.db_path(), temp_dir.path().join("vectors"));
    assert!(backend.is_connected().await);
    assert!(
        backend
            .list_collections()
            .await
            .expect("should list collections")
            .is_empty()
    );
}

#[tokio::test]
async fn collection_lifecycle() {
    let (backend, _temp_dir) = create_test_backend(3).await;

    backend
        .create_collection("opportunities", 3)
        .await
        .expect("should create collection");
    backend
        .create_collection("company_profiles", 3)
        .await
        .expect("should create collection");

    let err = backend
        .create_collection("opportunities", 3)
        .await
        .expect_err("duplicate should fail");
    assert!(matches!(err, BidMatchError::AlreadyExists(_)));

    assert_eq!(
        backend.list_collections().await.expect("should list"),
        vec!["company_profiles".to_string(), "opportunities".to_string()]
    );

    backend
        .delete_collection("opportunities")
        .await
        .expect("should delete collection");
    let err = backend
        .delete_collection("opportunities")
        .await
        .expect_err("second delete should fail");
    assert!(matches!(err, BidMatchError::NotFound(_)));
}

#[tokio::test]
async fn create_collection_rejects_bad_input() {
    let (backend, _temp_dir) = create_test_backend(3).await;

    assert!(matches!(
        backend.create_collection("bad name", 3).await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        backend.create_collection("ok", 0).await,
        Err(BidMatchError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn upsert_is_idempotent_and_replaces() {
    let (backend, _temp_dir) = create_test_backend(3).await;

    let first = record("opp-1", vec![1.0, 0.0, 0.0], "opportunity");
    backend
        .upsert("opportunities", vec![first.clone()])
        .await
        .expect("should upsert");
    backend
        .upsert("opportunities", vec![first])
        .await
        .expect("should upsert again");
    assert_eq!(backend.count("opportunities").await.expect("should count"), 1);

    let replacement = record("opp-1", vec![0.0, 1.0, 0.0], "company_profile");
    backend
        .upsert("opportunities", vec![replacement.clone()])
        .await
        .expect("should replace");

    let stored = backend
        .get_vector("opportunities", "opp-1")
        .await
        .expect("should fetch")
        .expect("record should exist");
    assert_eq!(stored, replacement);
    assert_eq!(backend.count("opportunities").await.expect("should count"), 1);
}

#[tokio::test]
async fn interrupted_upsert_never_loses_existing_records() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    let ids = ["a", "b", "c"];
    let originals: Vec<VectorRecord> = ids
        .iter()
        .map(|id| record(id, vec![1.0, 0.0, 0.0], "opportunity"))
        .collect();
    backend
        .upsert("opportunities", originals)
        .await
        .expect("should upsert");

    // Abandon replacement writes at different points of their progress
    for micros in [0, 50, 200, 1_000, 5_000, 20_000] {
        let replacements: Vec<VectorRecord> = ids
            .iter()
            .map(|id| record(id, vec![0.0, 1.0, 0.0], "company_profile"))
            .collect();
        let _ = tokio::time::timeout(
            Duration::from_micros(micros),
            backend.upsert("opportunities", replacements),
        )
        .await;

        assert_eq!(backend.count("opportunities").await.expect("should count"), 3);
        for id in ids {
            let stored = backend
                .get_vector("opportunities", id)
                .await
                .expect("should fetch")
                .expect("record should survive an abandoned write");
            assert!(stored.values == [1.0, 0.0, 0.0] || stored.values == [0.0, 1.0, 0.0]);
        }
    }
}

#[tokio::test]
async fn upsert_skips_wrong_dimension() {
    let (backend, _temp_dir) = create_test_backend(3).await;

    let summary = backend
        .upsert(
            "opportunities",
            vec![
                record("good", vec![1.0, 0.0, 0.0], "opportunity"),
                record("bad", vec![1.0, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("partial batch should succeed");
    assert_eq!(summary, UpsertSummary {
        upserted: 1,
        skipped: 1
    });

    let err = backend
        .upsert("opportunities", vec![record("bad", vec![1.0; 5], "opportunity")])
        .await
        .expect_err("all-bad batch should fail");
    assert!(matches!(err, BidMatchError::DimensionMismatch {
        expected: 3,
        actual: 5
    }));
    assert_eq!(backend.count("opportunities").await.expect("should count"), 1);
    assert!(
        backend
            .get_vector("opportunities", "bad")
            .await
            .expect("should fetch")
            .is_none()
    );
}

#[tokio::test]
async fn query_orders_by_similarity() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    backend
        .upsert(
            "opportunities",
            vec![
                record("far", vec![0.0, 0.0, 1.0], "opportunity"),
                record("near", vec![0.9, 0.1, 0.0], "opportunity"),
                record("exact", vec![1.0, 0.0, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("should upsert");

    let result = backend
        .query("opportunities", &[1.0, 0.0, 0.0], 2, &SearchFilters::new())
        .await
        .expect("should query");

    let ids: Vec<&str> = result.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["exact", "near"]);
    assert!((result.matches[0].score - 1.0).abs() < 1e-4);
    assert!(result.matches[0].score >= result.matches[1].score);
    assert_eq!(result.skipped_records, 0);
}

#[tokio::test]
async fn query_ties_break_by_id() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    backend
        .upsert(
            "opportunities",
            vec![
                record("b", vec![1.0, 0.0, 0.0], "opportunity"),
                record("c", vec![1.0, 0.0, 0.0], "opportunity"),
                record("a", vec![1.0, 0.0, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("should upsert");

    let result = backend
        .query("opportunities", &[1.0, 0.0, 0.0], 3, &SearchFilters::new())
        .await
        .expect("should query");
    let ids: Vec<&str> = result.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn ties_beyond_the_fetch_limit_still_break_by_id() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    // Inserted in descending id order so storage order disagrees with ranking
    let mut records: Vec<VectorRecord> = (0..40)
        .rev()
        .map(|i| record(&format!("r{i:02}"), vec![0.6, 0.8, 0.0], "opportunity"))
        .collect();
    records.push(record("best", vec![1.0, 0.0, 0.0], "opportunity"));
    backend
        .upsert("opportunities", records)
        .await
        .expect("should upsert");

    let single = backend
        .query("opportunities", &[0.6, 0.8, 0.0], 1, &SearchFilters::new())
        .await
        .expect("should query");
    let ids: Vec<&str> = single.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["r00"]);

    let three = backend
        .query("opportunities", &[1.0, 0.0, 0.0], 3, &SearchFilters::new())
        .await
        .expect("should query");
    let ids: Vec<&str> = three.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["best", "r00", "r01"]);
}

#[test]
fn cutoff_tie_detection() {
    let candidate = |id: &str, score: f32| VectorMatch {
        id: id.to_string(),
        score,
        metadata: Metadata::new(),
    };
    let tied = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.5)];
    assert!(cutoff_is_tied(&tied, 2));
    assert!(!cutoff_is_tied(&tied, 1));

    let distinct = vec![candidate("a", 0.9), candidate("b", 0.7), candidate("c", 0.5)];
    assert!(!cutoff_is_tied(&distinct, 2));
    assert!(!cutoff_is_tied(&[], 1));
}

#[tokio::test]
async fn reads_reject_bad_collection_names() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    assert!(matches!(
        backend
            .query("bad name", &[1.0, 0.0, 0.0], 5, &SearchFilters::new())
            .await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        backend.get_vector("../escape", "a").await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        backend.delete_vectors("", &["a".to_string()]).await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        backend.delete_collection("-dash").await,
        Err(BidMatchError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn query_applies_filters() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    backend
        .upsert(
            "mixed",
            vec![
                record("profile", vec![1.0, 0.0, 0.0], "company_profile"),
                record("opp", vec![0.5, 0.5, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("should upsert");

    let result = backend
        .query(
            "mixed",
            &[1.0, 0.0, 0.0],
            5,
            &SearchFilters::new().eq("type", "opportunity"),
        )
        .await
        .expect("should query");
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].id, "opp");
}

#[tokio::test]
async fn query_edge_cases() {
    let (backend, _temp_dir) = create_test_backend(3).await;

    let missing = backend
        .query("nothing", &[1.0, 0.0, 0.0], 5, &SearchFilters::new())
        .await
        .expect("missing collection is empty");
    assert_eq!(missing, QueryResult::default());

    backend
        .create_collection("empty", 3)
        .await
        .expect("should create");
    let empty = backend
        .query("empty", &[1.0, 0.0, 0.0], 5, &SearchFilters::new())
        .await
        .expect("empty collection is empty");
    assert!(empty.matches.is_empty());

    backend
        .upsert(
            "opportunities",
            vec![
                record("a", vec![1.0, 0.0, 0.0], "opportunity"),
                record("b", vec![0.0, 1.0, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("should upsert");
    let wrong_dim = backend
        .query("opportunities", &[1.0, 0.0], 5, &SearchFilters::new())
        .await
        .expect("wrong dimension is not an error");
    assert!(wrong_dim.matches.is_empty());
    assert_eq!(wrong_dim.skipped_records, 2);

    let fewer = backend
        .query("opportunities", &[1.0, 0.0, 0.0], 10, &SearchFilters::new())
        .await
        .expect("should query");
    assert_eq!(fewer.matches.len(), 2);
}

#[tokio::test]
async fn delete_vectors_removes_ids() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    backend
        .upsert(
            "opportunities",
            vec![
                record("o'brien", vec![1.0, 0.0, 0.0], "opportunity"),
                record("keep", vec![0.0, 1.0, 0.0], "opportunity"),
            ],
        )
        .await
        .expect("should upsert");

    backend
        .delete_vectors("opportunities", &["o'brien".to_string()])
        .await
        .expect("should delete");
    assert_eq!(backend.count("opportunities").await.expect("should count"), 1);

    let err = backend
        .delete_vectors("missing", &["x".to_string()])
        .await
        .expect_err("missing collection should fail");
    assert!(matches!(err, BidMatchError::NotFound(_)));
}

#[tokio::test]
async fn optimize_requires_collection() {
    let (backend, _temp_dir) = create_test_backend(3).await;
    assert!(matches!(
        backend.optimize("missing").await,
        Err(BidMatchError::NotFound(_))
    ));

    backend
        .upsert("opportunities", vec![record("a", vec![1.0, 0.0, 0.0], "opportunity")])
        .await
        .expect("should upsert");
    backend
        .optimize("opportunities")
        .await
        .expect("should optimize");
    assert_eq!(backend.count("opportunities").await.expect("should count"), 1);
}

#[test]
fn id_predicate_escapes_quotes() {
    assert_eq!(id_predicate(&["a", "o'brien"]), "id IN ('a', 'o''brien')");
}

#[test]
fn record_batch_shape() {
    let records = vec![
        record("a", vec![1.0, 0.0, 0.0], "opportunity"),
        record("b", vec![0.0, 1.0, 0.0], "opportunity"),
    ];
    let batch = create_record_batch(&records, 3).expect("should build batch");
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.num_columns(), 3);

    let parsed = parse_records(&batch).expect("should parse batch");
    assert_eq!(parsed, records);
}
