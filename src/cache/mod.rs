// In-process TTL cache for chat responses, embeddings and search results.
// A side channel only: every caller must behave the same with it disabled.

#[cfg(test)]
mod tests;

pub mod keys;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::models::SearchOutcome;

pub use keys::{ChatMessage, chat_key, embedding_key, search_key};

pub const CHAT_PREFIX: &str = "chat:";
pub const EMBEDDING_PREFIX: &str = "embedding:";
pub const SEARCH_PREFIX: &str = "search:";

const OTHER_NAMESPACE: &str = "other";

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Chat(String),
    Embedding(Vec<f32>),
    Search(SearchOutcome),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub entries_by_namespace: BTreeMap<String, usize>,
    pub hits: u64,
    pub misses: u64,
    pub enabled: bool,
}

/// Default TTL per key namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceTtls {
    pub chat: Duration,
    pub embedding: Duration,
    pub search: Duration,
}

impl Default for NamespaceTtls {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for NamespaceTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            chat: Duration::from_secs(config.chat_ttl_seconds),
            embedding: Duration::from_secs(config.embedding_ttl_seconds),
            search: Duration::from_secs(config.search_ttl_seconds),
        }
    }
}

impl NamespaceTtls {
    /// TTL for a key by its prefix; unprefixed keys get the shortest
    #[inline]
    pub fn for_key(&self, key: &str) -> Duration {
        if key.starts_with(EMBEDDING_PREFIX) {
            self.embedding
        } else if key.starts_with(SEARCH_PREFIX) {
            self.search
        } else {
            self.chat
        }
    }
}

pub struct CacheLayer {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttls: NamespaceTtls,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(NamespaceTtls::default(), true)
    }
}

impl CacheLayer {
    #[inline]
    pub fn new(ttls: NamespaceTtls, enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttls,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(NamespaceTtls::from(config), config.enabled)
    }

    /// A cache that never stores anything
    #[inline]
    pub fn disabled() -> Self {
        Self::new(NamespaceTtls::default(), false)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Live value for `key`; an expired entry is evicted and reported as a miss
    #[inline]
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        let expired = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
                debug!("Evicted expired cache entry {}", key);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    #[inline]
    pub fn set(&self, key: impl Into<String>, value: CachedValue, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Store with the default TTL of the key's namespace
    #[inline]
    pub fn insert(&self, key: impl Into<String>, value: CachedValue) {
        let key = key.into();
        let ttl = self.ttls.for_key(&key);
        self.set(key, value, ttl);
    }

    #[inline]
    pub fn get_embedding(&self, key: &str) -> Option<Vec<f32>> {
        match self.get(key)? {
            CachedValue::Embedding(values) => Some(values),
            _ => None,
        }
    }

    #[inline]
    pub fn get_search(&self, key: &str) -> Option<SearchOutcome> {
        match self.get(key)? {
            CachedValue::Search(outcome) => Some(outcome),
            _ => None,
        }
    }

    #[inline]
    pub fn get_chat(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            CachedValue::Chat(response) => Some(response),
            _ => None,
        }
    }

    #[inline]
    pub fn get_stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut entries_by_namespace = BTreeMap::new();
        let mut total_entries = 0;
        for (key, entry) in entries.iter() {
            if entry.is_expired(now) {
                continue;
            }
            total_entries += 1;
            *entries_by_namespace
                .entry(namespace_of(key).to_string())
                .or_insert(0) += 1;
        }

        CacheStats {
            total_entries,
            entries_by_namespace,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            enabled: self.enabled,
        }
    }

    #[inline]
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.len();
        entries.clear();
        info!("Cleared {} cache entries", removed);
    }

    /// Remove every entry whose key starts with `prefix`
    #[inline]
    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        debug!("Cleared {} cache entries with prefix {}", removed, prefix);
        removed
    }

    #[inline]
    pub fn delete_key(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    #[inline]
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Purge expired entries every `interval` until `cancel` fires
    #[inline]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Cache sweeper purged {} expired entries", purged);
                }
            }
            debug!("Cache sweeper stopped");
        })
    }
}

fn namespace_of(key: &str) -> &str {
    key.split_once(':')
        .map_or(OTHER_NAMESPACE, |(namespace, _)| namespace)
}
