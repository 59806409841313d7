use super::test_support::{
    DIMENSION, FixedProvider, local_engine, opportunity_record, profile, provider_for,
    vector_with_score,
};
use super::*;
use crate::models::{COMPANY_PROFILE_TYPE, Metadata, VectorRecord};

#[test]
fn match_filters_translate() {
    let filters = MatchFilters {
        record_type: Some("opportunity".to_string()),
        naics_codes: vec!["541511".to_string()],
        tags: vec![],
        date_range: Some(DateRange {
            field: "responseDeadline".to_string(),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            to: None,
        }),
    }
    .to_search_filters();

    let expected = SearchFilters::new()
        .eq("type", "opportunity")
        .any_of("naicsCode", vec!["541511".into()])
        .range("responseDeadline", Some("2024-01-01".into()), None);
    assert_eq!(filters, expected);
    assert!(MatchFilters::default().to_search_filters().is_empty());
}

#[test]
fn match_filters_json_defaults_date_field() {
    let filters: MatchFilters = serde_json::from_str(
        r#"{"naicsCodes": ["236220"], "dateRange": {"from": "2024-03-01", "to": "2024-03-31"}}"#,
    )
    .expect("should parse filters");
    let range = filters.date_range.expect("range should be present");
    assert_eq!(range.field, "responseDeadline");
    assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 3, 31));
}

#[tokio::test]
async fn top_k_bounds() {
    let test = local_engine(FixedProvider::new(), true).await;
    for bad in [0, MAX_TOP_K + 1] {
        let err = test
            .engine
            .query(
                QueryInput::Vector(vec![1.0, 0.0, 0.0]),
                "opportunities",
                bad,
                &MatchFilters::default(),
            )
            .await
            .expect_err("out-of-range top_k should fail");
        assert!(matches!(err, BidMatchError::InvalidArgument(_)));
    }
}

#[tokio::test]
async fn empty_inputs_are_rejected() {
    let test = local_engine(FixedProvider::new(), true).await;
    let filters = MatchFilters::default();

    assert!(matches!(
        test.engine
            .query(QueryInput::Vector(vec![]), "opportunities", 5, &filters)
            .await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        test.engine
            .query(QueryInput::Text("  ".to_string()), "opportunities", 5, &filters)
            .await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        test.engine
            .query(QueryInput::Vector(vec![1.0]), "bad name", 5, &filters)
            .await,
        Err(BidMatchError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn empty_then_populated_collection() {
    for cache_enabled in [true, false] {
        let test = local_engine(FixedProvider::new(), cache_enabled).await;
        let values = vec![0.2, 0.4, 0.6];

        let empty = test
            .engine
            .query(
                QueryInput::Vector(values.clone()),
                "opportunities",
                5,
                &MatchFilters::default(),
            )
            .await
            .expect("empty collection should query");
        assert!(empty.results.is_empty());
        assert_eq!(empty.total_results, 0);

        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), "opportunity".into());
        metadata.insert("naicsCode".to_string(), "541511".into());
        test.seed("opportunities", vec![VectorRecord::new("o1", values.clone(), metadata)])
            .await;

        let found = test
            .engine
            .query(
                QueryInput::Vector(values),
                "opportunities",
                5,
                &MatchFilters::default(),
            )
            .await
            .expect("should query");
        assert_eq!(found.total_results, 1);
        assert_eq!(found.results[0].opportunity.id, "o1");
        assert_eq!(found.results[0].opportunity.title, "o1");
        assert_eq!(found.results[0].opportunity.naics_codes, vec!["541511"]);
        assert!((found.results[0].score - 1.0).abs() < 1e-4);
    }
}

#[tokio::test]
async fn repeated_query_is_served_from_cache_when_enabled() {
    for cache_enabled in [true, false] {
        let user = profile("p1");
        let test = local_engine(provider_for(&user), cache_enabled).await;
        test.seed(
            "opportunities",
            vec![opportunity_record("o1", 0.9), opportunity_record("o2", 0.5)],
        )
        .await;

        let first = test
            .engine
            .match_profile(&user, 5, &MatchFilters::default())
            .await
            .expect("should match");
        let second = test
            .engine
            .match_profile(&user, 5, &MatchFilters::default())
            .await
            .expect("should match");

        assert!(!first.from_cache);
        assert_eq!(second.from_cache, cache_enabled);
        assert_eq!(first.results, second.results);
        let expected_calls = if cache_enabled { 1 } else { 2 };
        assert_eq!(test.provider.call_count(), expected_calls);
    }
}

#[tokio::test]
async fn match_profile_only_returns_opportunities() {
    for cache_enabled in [true, false] {
        let user = profile("p1");
        let test = local_engine(provider_for(&user), cache_enabled).await;

        let mut other = Metadata::new();
        other.insert("type".to_string(), COMPANY_PROFILE_TYPE.into());
        test.seed(
            "opportunities",
            vec![
                opportunity_record("o1", 0.8),
                opportunity_record("o2", 0.6),
                VectorRecord::new("p-other", vec![1.0, 0.0, 0.0], other),
            ],
        )
        .await;

        let outcome = test
            .engine
            .match_profile(&user, 10, &MatchFilters::default())
            .await
            .expect("should match");
        let ids: Vec<&str> = outcome
            .results
            .iter()
            .map(|r| r.opportunity.id.as_str())
            .collect();
        assert_eq!(ids, vec!["o1", "o2"]);
        assert!((outcome.results[0].score - 0.8).abs() < 1e-3);
    }
}

#[tokio::test]
async fn skipped_records_surface_for_wrong_query_dimension() {
    let test = local_engine(FixedProvider::new(), false).await;
    test.seed("opportunities", vec![opportunity_record("o1", 0.9)])
        .await;

    let outcome = test
        .engine
        .query(
            QueryInput::Vector(vec![1.0, 0.0]),
            "opportunities",
            5,
            &MatchFilters::default(),
        )
        .await
        .expect("should not fail");
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.skipped_records, 1);
}

#[tokio::test]
async fn add_opportunities_and_profile() {
    for cache_enabled in [true, false] {
        let test = local_engine(FixedProvider::new(), cache_enabled).await;

        let opportunities = vec![
            Opportunity {
                id: "o1".to_string(),
                title: "Cloud migration support".to_string(),
                synopsis: "Migrate agency workloads to cloud".to_string(),
                naics_codes: vec!["541512".to_string()],
                response_deadline: NaiveDate::from_ymd_opt(2024, 5, 1),
                ..Opportunity::default()
            },
            Opportunity {
                id: "o2".to_string(),
                title: "Grounds maintenance".to_string(),
                ..Opportunity::default()
            },
        ];
        let summary = test
            .engine
            .add_opportunities(&opportunities)
            .await
            .expect("should add opportunities");
        assert_eq!(summary, UpsertSummary {
            upserted: 2,
            skipped: 0
        });

        let stored = test
            .store
            .get_vector("opportunities", "o1")
            .await
            .expect("should fetch")
            .expect("o1 should exist");
        assert_eq!(stored.values.len(), DIMENSION);
        assert_eq!(
            Opportunity::from_metadata(&stored.id, &stored.metadata),
            opportunities[0]
        );

        let user = profile("p1");
        test.engine
            .add_company_profile(&user)
            .await
            .expect("should add profile");
        let stored_profile = test
            .store
            .get_vector("company_profiles", "p1")
            .await
            .expect("should fetch")
            .expect("profile should exist");
        assert_eq!(stored_profile.record_type(), Some(COMPANY_PROFILE_TYPE));

        let window = MatchFilters {
            date_range: Some(DateRange {
                field: "responseDeadline".to_string(),
                from: NaiveDate::from_ymd_opt(2024, 4, 1),
                to: NaiveDate::from_ymd_opt(2024, 5, 31),
            }),
            ..MatchFilters::default()
        };
        let outcome = test
            .engine
            .query(
                QueryInput::Vector(stored.values.clone()),
                "opportunities",
                10,
                &window,
            )
            .await
            .expect("should query");
        assert_eq!(outcome.total_results, 1);
        assert_eq!(outcome.results[0].opportunity.id, "o1");
    }
}

#[tokio::test]
async fn writes_invalidate_cached_searches() {
    let user = profile("p1");
    let test = local_engine(provider_for(&user), true).await;
    test.seed("opportunities", vec![opportunity_record("o1", 0.9)])
        .await;

    let before = test
        .engine
        .match_profile(&user, 5, &MatchFilters::default())
        .await
        .expect("should match");
    assert_eq!(before.total_results, 1);

    test.engine
        .store()
        .upsert("opportunities", vec![opportunity_record("o2", 0.4)])
        .await
        .expect("should upsert");
    test.engine
        .add_company_profile(&profile("p2"))
        .await
        .expect("should add profile");

    let after = test
        .engine
        .match_profile(&user, 5, &MatchFilters::default())
        .await
        .expect("should match");
    assert!(!after.from_cache);
    assert_eq!(after.total_results, 2);
}

#[test]
fn vector_with_score_is_unit_length() {
    let v = vector_with_score(0.75);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
}
