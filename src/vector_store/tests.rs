use super::*;
use tempfile::TempDir;

fn vector_match(id: &str, score: f32) -> VectorMatch {
    VectorMatch {
        id: id.to_string(),
        score,
        metadata: Metadata::new(),
    }
}

#[test]
fn collection_name_validation() {
    assert!(validate_collection_name("opportunities").is_ok());
    assert!(validate_collection_name("company_profiles-2024").is_ok());
    assert!(validate_collection_name("9lives").is_ok());

    for bad in ["", "_leading", "-leading", "has space", "dots.are.bad", "slash/name"] {
        assert!(
            matches!(
                validate_collection_name(bad),
                Err(BidMatchError::InvalidArgument(_))
            ),
            "{bad:?} should be rejected"
        );
    }
    assert!(validate_collection_name(&"a".repeat(64)).is_ok());
    assert!(validate_collection_name(&"a".repeat(65)).is_err());
}

#[test]
fn rank_matches_orders_and_truncates() {
    let ranked = rank_matches(
        vec![
            vector_match("c", 0.5),
            vector_match("b", 0.9),
            vector_match("a", 0.5),
            vector_match("d", 0.1),
        ],
        3,
    );
    let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
}

#[test]
fn partition_skips_and_dedups() {
    let records = vec![
        VectorRecord::new("a", vec![1.0, 0.0], Metadata::new()),
        VectorRecord::new("b", vec![1.0], Metadata::new()),
        VectorRecord::new("a", vec![0.0, 1.0], Metadata::new()),
    ];

    let (accepted, skipped) = partition_by_dimension(records, 2);
    assert_eq!(skipped, 1);
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].values, vec![0.0, 1.0]);
}

#[tokio::test]
async fn factory_returns_same_instance() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let factory = VectorStoreFactory::new(config);
    assert!(!factory.is_initialized());

    let first = factory.get().await.expect("should create store");
    let second = factory.get().await.expect("should reuse store");
    assert!(factory.is_initialized());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.backend_name(), "local");
}

#[tokio::test]
async fn cloud_backend_selected_from_config() {
    let mut config = Config::default();
    config.vector_store.backend = VectorBackendKind::Cloud;
    config.vector_store.index_host = Some("https://opps-abc123.svc.pinecone.io".to_string());
    config.vector_store.api_key = Some("pc-test".to_string());

    let store = create_vector_store(&config)
        .await
        .expect("cloud backend construction does not touch the network");
    assert_eq!(store.backend_name(), "cloud");
}
