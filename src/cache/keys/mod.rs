
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CHAT_PREFIX, EMBEDDING_PREFIX, SEARCH_PREFIX};
use crate::vector_store::SearchFilters;

/// One turn of a chat transcript as it participates in the chat cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Length-prefixed fields so adjacent values can never run together
struct KeyHasher(Sha256);

impl KeyHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field(domain.as_bytes());
        hasher
    }

    fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    fn finish(self, prefix: &str) -> String {
        format!("{}{}", prefix, hex::encode(self.0.finalize()))
    }
}

#[inline]
pub fn chat_key(
    messages: &[ChatMessage],
    profile_id: Option<&str>,
    provider: &str,
    model: &str,
) -> String {
    let mut hasher = KeyHasher::new("chat");
    hasher.field(&(messages.len() as u64).to_le_bytes());
    for message in messages {
        hasher
            .field(message.role.as_bytes())
            .field(message.content.as_bytes());
    }
    hasher
        .field(profile_id.unwrap_or_default().as_bytes())
        .field(&[u8::from(profile_id.is_some())])
        .field(provider.as_bytes())
        .field(model.as_bytes());
    hasher.finish(CHAT_PREFIX)
}

#[inline]
pub fn embedding_key(provider: &str, model: &str, text: &str) -> String {
    let mut hasher = KeyHasher::new("embedding");
    hasher
        .field(provider.as_bytes())
        .field(model.as_bytes())
        .field(text.as_bytes());
    hasher.finish(EMBEDDING_PREFIX)
}

/// Key over the exact bit patterns of the vector, so `0.0` and `-0.0` differ
#[inline]
pub fn search_key(vector: &[f32], collection: &str, top_k: usize, filters: &SearchFilters) -> String {
    let vector_bytes: Vec<u8> = vector
        .iter()
        .flat_map(|v| v.to_bits().to_le_bytes())
        .collect();
    let filter_json = serde_json::to_string(&filters.normalized()).unwrap_or_default();

    let mut hasher = KeyHasher::new("search");
    hasher
        .field(&vector_bytes)
        .field(collection.as_bytes())
        .field(&(top_k as u64).to_le_bytes())
        .field(filter_json.as_bytes());
    hasher.finish(SEARCH_PREFIX)
}
