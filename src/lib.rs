use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, BidMatchError>;

#[derive(Error, Debug)]
pub enum BidMatchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BidMatchError {
    /// Whether a caller may retry the failed operation later.
    ///
    /// Only transient backend and provider failures qualify; bad input and
    /// integrity problems will fail the same way again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

/// Await `future`, converting an elapsed deadline into `BackendUnavailable`.
#[inline]
pub async fn with_timeout<T, F>(
    timeout: std::time::Duration,
    operation: &str,
    future: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future).await.map_err(|_| {
        BidMatchError::BackendUnavailable(format!("{} timed out after {:?}", operation, timeout))
    })?
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod http;
pub mod matching;
pub mod models;
pub mod rate_limit;
pub mod realtime;
pub mod services;
pub mod vector_store;
