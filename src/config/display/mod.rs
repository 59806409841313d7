
use console::style;

use super::{Config, EmbeddingProviderKind, VectorBackendKind};

/// Print the effective configuration to stderr with credentials masked
#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!(
        "  Provider: {}",
        style(provider_label(config.embedding.provider)).cyan()
    );
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    match config.embedding.provider {
        EmbeddingProviderKind::Ollama => match config.ollama_url() {
            Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
        },
        EmbeddingProviderKind::OpenAi => {
            eprintln!("  Base URL: {}", style(&config.embedding.base_url).cyan());
            eprintln!(
                "  API Key: {}",
                style(redact(config.embedding.api_key.as_deref())).dim()
            );
        }
        EmbeddingProviderKind::Hash => {}
    }

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    match config.vector_store.backend {
        VectorBackendKind::Local => {
            eprintln!("  Backend: {}", style("local (LanceDB)").cyan());
            eprintln!(
                "  Path: {}",
                style(config.vector_database_path().display()).cyan()
            );
        }
        VectorBackendKind::Cloud => {
            eprintln!("  Backend: {}", style("cloud").cyan());
            eprintln!(
                "  Index Host: {}",
                style(config.vector_store.index_host.as_deref().unwrap_or("(unset)")).cyan()
            );
            eprintln!(
                "  API Key: {}",
                style(redact(config.vector_store.api_key.as_deref())).dim()
            );
        }
    }

    eprintln!();
    eprintln!("{}", style("Matching:").bold().yellow());
    eprintln!("  Top K: {}", style(config.matching.top_k).cyan());
    eprintln!(
        "  Collections: {} / {}",
        style(&config.matching.opportunities_collection).cyan(),
        style(&config.matching.profiles_collection).cyan()
    );
    eprintln!(
        "  Check Interval: {}ms",
        style(config.matcher.check_interval_ms).cyan()
    );
    eprintln!(
        "  Min Match Score: {}",
        style(config.matcher.min_match_score).cyan()
    );
    eprintln!(
        "  Max Alerts/Profile: {}",
        style(config.matcher.max_alerts_per_profile).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Cache:").bold().yellow());
    eprintln!(
        "  Enabled: {}",
        if config.cache.enabled {
            style("yes").green()
        } else {
            style("no").red()
        }
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn provider_label(provider: EmbeddingProviderKind) -> &'static str {
    match provider {
        EmbeddingProviderKind::Ollama => "ollama",
        EmbeddingProviderKind::OpenAi => "openai",
        EmbeddingProviderKind::Hash => "hash (offline)",
    }
}

/// Keep only the last four characters of a secret
pub(crate) fn redact(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "(unset)".to_string(),
        Some(key) => {
            let chars: Vec<char> = key.chars().collect();
            if chars.len() <= 4 {
                "****".to_string()
            } else {
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("****{tail}")
            }
        }
    }
}
