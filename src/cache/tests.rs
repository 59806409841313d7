use super::*;

fn short_ttls() -> NamespaceTtls {
    NamespaceTtls {
        chat: Duration::from_secs(5),
        embedding: Duration::from_secs(60),
        search: Duration::from_secs(30),
    }
}

#[tokio::test(start_paused = true)]
async fn entry_expires_after_ttl() {
    let cache = CacheLayer::new(short_ttls(), true);
    cache.set("chat:abc", CachedValue::Chat("hello".to_string()), Duration::from_secs(10));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(cache.get_chat("chat:abc"), Some("hello".to_string()));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("chat:abc"), None);

    let stats = cache.get_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn insert_uses_namespace_ttl() {
    let cache = CacheLayer::new(short_ttls(), true);
    cache.insert("chat:1", CachedValue::Chat("c".to_string()));
    cache.insert("embedding:1", CachedValue::Embedding(vec![1.0]));
    cache.insert("search:1", CachedValue::Search(SearchOutcome::default()));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.get("chat:1").is_none());
    assert!(cache.get_search("search:1").is_some());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(cache.get("search:1").is_none());
    assert_eq!(cache.get_embedding("embedding:1"), Some(vec![1.0]));
}

#[test]
fn overwrite_keeps_last_value() {
    let cache = CacheLayer::default();
    cache.insert("chat:k", CachedValue::Chat("first".to_string()));
    cache.insert("chat:k", CachedValue::Chat("second".to_string()));
    assert_eq!(cache.get_chat("chat:k"), Some("second".to_string()));
    assert_eq!(cache.get_stats().total_entries, 1);
}

#[test]
fn typed_getters_reject_other_variants() {
    let cache = CacheLayer::default();
    cache.insert("embedding:k", CachedValue::Embedding(vec![0.5]));
    assert_eq!(cache.get_chat("embedding:k"), None);
    assert_eq!(cache.get_search("embedding:k"), None);
}

#[test]
fn disabled_cache_stores_nothing() {
    let cache = CacheLayer::disabled();
    cache.insert("chat:k", CachedValue::Chat("value".to_string()));
    assert!(cache.get("chat:k").is_none());

    let stats = cache.get_stats();
    assert!(!stats.enabled);
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.hits + stats.misses, 0);
}

#[test]
fn stats_group_by_namespace() {
    let cache = CacheLayer::default();
    cache.insert("chat:a", CachedValue::Chat("a".to_string()));
    cache.insert("chat:b", CachedValue::Chat("b".to_string()));
    cache.insert("search:a", CachedValue::Search(SearchOutcome::default()));
    cache.insert("raw", CachedValue::Chat("raw".to_string()));

    let stats = cache.get_stats();
    assert_eq!(stats.total_entries, 4);
    assert_eq!(stats.entries_by_namespace.get("chat"), Some(&2));
    assert_eq!(stats.entries_by_namespace.get("search"), Some(&1));
    assert_eq!(stats.entries_by_namespace.get("other"), Some(&1));
}

#[test]
fn selective_invalidation() {
    let cache = CacheLayer::default();
    cache.insert("chat:a", CachedValue::Chat("a".to_string()));
    cache.insert("chat:b", CachedValue::Chat("b".to_string()));
    cache.insert("embedding:a", CachedValue::Embedding(vec![1.0]));

    assert_eq!(cache.clear_by_prefix(CHAT_PREFIX), 2);
    assert_eq!(cache.clear_by_prefix(CHAT_PREFIX), 0);
    assert!(cache.delete_key("embedding:a"));
    assert!(!cache.delete_key("embedding:a"));

    cache.insert("search:z", CachedValue::Search(SearchOutcome::default()));
    cache.clear();
    assert_eq!(cache.get_stats().total_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn purge_removes_only_expired() {
    let cache = CacheLayer::new(short_ttls(), true);
    cache.insert("chat:old", CachedValue::Chat("old".to_string()));
    cache.insert("embedding:new", CachedValue::Embedding(vec![1.0]));

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.purge_expired(), 1);
    assert!(cache.get("embedding:new").is_some());
}

#[tokio::test(start_paused = true)]
async fn sweeper_purges_until_cancelled() {
    let cache = Arc::new(CacheLayer::new(short_ttls(), true));
    cache.insert("chat:old", CachedValue::Chat("old".to_string()));

    let cancel = CancellationToken::new();
    let handle = cache.spawn_sweeper(Duration::from_secs(10), cancel.clone());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(
        cache
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len(),
        0
    );

    cancel.cancel();
    handle.await.expect("sweeper should stop cleanly");
}

#[test]
fn zero_ttl_is_not_stored() {
    let cache = CacheLayer::default();
    cache.set("chat:k", CachedValue::Chat("v".to_string()), Duration::ZERO);
    assert!(cache.get("chat:k").is_none());
}
