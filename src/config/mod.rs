// Configuration management
// TOML file under the platform config directory, validated on load

pub mod display;
pub mod settings;

pub use display::show_config;
pub use settings::{
    CacheConfig, Config, ConfigError, EmbeddingConfig, EmbeddingProviderKind, MatcherConfig,
    MatcherConfigUpdate, MatchingConfig, RateLimitConfig, VectorBackendKind, VectorStoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
