use super::*;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn unit_length_and_dimension() {
    let v = hash_embedding("Cloud migration services for federal agencies", 64);
    assert_eq!(v.len(), 64);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn deterministic_and_case_insensitive() {
    assert_eq!(
        hash_embedding("Cyber Security", 128),
        hash_embedding("cyber   security!", 128)
    );
}

#[test]
fn shared_vocabulary_scores_higher() {
    let profile = hash_embedding("cloud migration devops security", 256);
    let related = hash_embedding("cloud migration for agency workloads", 256);
    let unrelated = hash_embedding("janitorial grounds maintenance", 256);
    assert!(cosine(&profile, &related) > cosine(&profile, &unrelated));
}

#[test]
fn punctuation_only_text_is_hashed_whole() {
    let v = hash_embedding("!!!", 16);
    assert!(v.iter().any(|x| *x != 0.0));
}

#[tokio::test]
async fn provider_rejects_empty_text() {
    let embedder = HashEmbedder::new(8);
    assert_eq!(embedder.name(), "hash");
    assert!(matches!(
        embedder.embed("   ").await,
        Err(BidMatchError::InvalidArgument(_))
    ));
    assert_eq!(embedder.embed("abc").await.expect("should embed").len(), 8);
    assert!(embedder.health_check().await.is_ok());
}
