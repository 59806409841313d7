
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    /// Deterministic token hashing, no external provider
    #[default]
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: u32,
    pub batch_size: u32,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 16,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    /// Embedded LanceDB under the base directory
    #[default]
    Local,
    /// Managed index over HTTPS
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: VectorBackendKind,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    /// Data-plane host of the cloud index
    pub index_host: Option<String>,
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::default(),
            timeout_seconds: 30,
            retry_attempts: 3,
            index_host: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub chat_ttl_seconds: u64,
    pub embedding_ttl_seconds: u64,
    pub search_ttl_seconds: u64,
    /// Interval of the background expiry sweep; 0 leaves eviction lazy
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_ttl_seconds: 300,
            embedding_ttl_seconds: 86_400,
            search_ttl_seconds: 1_800,
            sweep_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchingConfig {
    pub top_k: usize,
    pub call_timeout_seconds: u64,
    pub opportunities_collection: String,
    pub profiles_collection: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: 25,
            call_timeout_seconds: 30,
            opportunities_collection: "opportunities".to_string(),
            profiles_collection: "company_profiles".to_string(),
        }
    }
}

impl MatchingConfig {
    #[inline]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

/// Runtime settings of the real-time matcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    pub check_interval_ms: u64,
    /// Threshold on a 0-100 scale, compared against `score * 100`
    pub min_match_score: f32,
    pub max_alerts_per_profile: usize,
    pub enable_notifications: bool,
    pub auto_refresh: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 300_000,
            min_match_score: 70.0,
            max_alerts_per_profile: 10,
            enable_notifications: true,
            auto_refresh: true,
        }
    }
}

impl MatcherConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_ms == 0 {
            return Err(ConfigError::InvalidCheckInterval(self.check_interval_ms));
        }
        if !(0.0..=100.0).contains(&self.min_match_score) {
            return Err(ConfigError::InvalidMinMatchScore(self.min_match_score));
        }
        if self.max_alerts_per_profile == 0 {
            return Err(ConfigError::InvalidMaxAlerts(self.max_alerts_per_profile));
        }
        Ok(())
    }

    #[inline]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Partial matcher settings; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfigUpdate {
    pub check_interval_ms: Option<u64>,
    pub min_match_score: Option<f32>,
    pub max_alerts_per_profile: Option<usize>,
    pub enable_notifications: Option<bool>,
    pub auto_refresh: Option<bool>,
}

impl MatcherConfigUpdate {
    /// Apply onto `config`, leaving it untouched if the result is invalid
    #[inline]
    pub fn apply_to(&self, config: &mut MatcherConfig) -> Result<(), ConfigError> {
        let mut updated = config.clone();
        if let Some(interval) = self.check_interval_ms {
            updated.check_interval_ms = interval;
        }
        if let Some(score) = self.min_match_score {
            updated.min_match_score = score;
        }
        if let Some(max_alerts) = self.max_alerts_per_profile {
            updated.max_alerts_per_profile = max_alerts;
        }
        if let Some(enabled) = self.enable_notifications {
            updated.enable_notifications = enabled;
        }
        if let Some(auto_refresh) = self.auto_refresh {
            updated.auto_refresh = auto_refresh;
        }
        updated.validate()?;
        *config = updated;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    #[inline]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

fn default_rate_limits() -> BTreeMap<String, RateLimitConfig> {
    BTreeMap::from([
        (
            "api".to_string(),
            RateLimitConfig {
                max_requests: 100,
                window_seconds: 900,
            },
        ),
        (
            "chat".to_string(),
            RateLimitConfig {
                max_requests: 20,
                window_seconds: 60,
            },
        ),
        (
            "search".to_string(),
            RateLimitConfig {
                max_requests: 60,
                window_seconds: 60,
            },
        ),
    ])
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 2 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),
    #[error("Missing index host for the cloud vector store")]
    MissingIndexHost,
    #[error("Invalid timeout: {0} seconds (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid top_k: {0} (must be between 1 and 1000)")]
    InvalidTopK(usize),
    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),
    #[error("Invalid check interval: {0}ms (must be greater than zero)")]
    InvalidCheckInterval(u64),
    #[error("Invalid minimum match score: {0} (must be between 0 and 100)")]
    InvalidMinMatchScore(f32),
    #[error("Invalid max alerts per profile: {0} (must be at least 1)")]
    InvalidMaxAlerts(usize),
    #[error("Invalid rate limit for '{0}': max_requests and window_seconds must be positive")]
    InvalidRateLimit(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Platform configuration directory for bidmatch
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("bidmatch"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.vector_store.validate()?;
        self.validate_matching_config()?;
        self.matcher.validate()?;

        for (class, limit) in &self.rate_limits {
            if limit.max_requests == 0 || limit.window_seconds == 0 {
                return Err(ConfigError::InvalidRateLimit(class.clone()));
            }
        }

        Ok(())
    }

    fn validate_matching_config(&self) -> Result<(), ConfigError> {
        let config = &self.matching;

        if !(1..=1000).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        validate_timeout(config.call_timeout_seconds)?;

        for name in [
            &config.opportunities_collection,
            &config.profiles_collection,
        ] {
            if crate::vector_store::validate_collection_name(name).is_err() {
                return Err(ConfigError::InvalidCollectionName(name.clone()));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the local vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.embedding.dimension as usize
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.embedding.ollama_url()
    }
}

fn validate_timeout(seconds: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&seconds) {
        return Err(ConfigError::InvalidTimeout(seconds));
    }
    Ok(())
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        validate_timeout(self.timeout_seconds)?;

        match self.provider {
            EmbeddingProviderKind::Ollama => {
                if self.protocol != "http" && self.protocol != "https" {
                    return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
                }
                if self.port == 0 {
                    return Err(ConfigError::InvalidPort(self.port));
                }
                self.ollama_url()?;
            }
            EmbeddingProviderKind::OpenAi => {
                Url::parse(&self.base_url)
                    .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
                if self.api_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
                    return Err(ConfigError::MissingApiKey("the OpenAI embedding provider"));
                }
            }
            EmbeddingProviderKind::Hash => {}
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl VectorStoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout(self.timeout_seconds)?;

        if self.backend == VectorBackendKind::Cloud {
            let host = self
                .index_host
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .ok_or(ConfigError::MissingIndexHost)?;
            Url::parse(host).map_err(|_| ConfigError::InvalidUrl(host.to_string()))?;

            if self.api_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
                return Err(ConfigError::MissingApiKey("the cloud vector store"));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
