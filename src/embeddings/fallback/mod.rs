//! Deterministic feature-hashing embeddings for deployments without a model
//! server. Similarity reflects shared vocabulary rather than meaning.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::{BidMatchError, Result};

pub const HASH_MODEL: &str = "sha256-token-hash";

/// Hash each lowercase alphanumeric token into a signed bucket, then
/// L2-normalize. Text without tokens is hashed whole.
#[inline]
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    if dimension == 0 {
        return vector;
    }

    let lower = text.to_lowercase();
    let mut tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        tokens.push(lower.as_str());
    }

    for token in tokens {
        let digest = Sha256::digest(token.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(index_bytes) % dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    l2_normalize(&mut vector);
    vector
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn model(&self) -> &str {
        HASH_MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(BidMatchError::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }
        Ok(hash_embedding(text, self.dimension))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
