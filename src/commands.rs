use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{Config, show_config};
use crate::matching::{MatchFilters, QueryInput};
use crate::models::{CompanyProfile, Opportunity, SearchOutcome};
use crate::services::Services;
use crate::vector_store::create_vector_store;

/// Parse a JSON argument given either inline or as a path to a file
#[inline]
pub fn read_json_arg<T: DeserializeOwned>(arg: &str) -> Result<T> {
    let trimmed = arg.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(arg).context("Failed to parse inline JSON");
    }

    let path = Path::new(arg);
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse JSON file {}", path.display()))
}

/// Accept either one opportunity or an array of them
fn read_opportunities(arg: &str) -> Result<Vec<Opportunity>> {
    let value: serde_json::Value = read_json_arg(arg)?;
    if value.is_array() {
        serde_json::from_value(value).context("Invalid opportunity list")
    } else {
        Ok(vec![
            serde_json::from_value(value).context("Invalid opportunity")?,
        ])
    }
}

/// Print the configuration, or write it out so it can be edited
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<()> {
    if show {
        show_config(config);
        return Ok(());
    }

    config.save()?;
    println!(
        "{} Configuration written to {}",
        style("✓").green(),
        config.config_file_path().display()
    );
    println!("Edit the file to change providers, backends or matcher settings.");
    Ok(())
}

/// Probe the embedding provider and vector store
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("bidmatch status").bold().cyan());
    println!("{}", "=".repeat(40));

    let services = Services::initialize(config.clone()).await?;

    let embeddings = services.embeddings();
    print!(
        "Embeddings: {} ({}, {} dimensions) ... ",
        embeddings.provider_name(),
        embeddings.model(),
        embeddings.dimension()
    );
    match embeddings.health_check().await {
        Ok(()) => println!("{}", style("ok").green()),
        Err(e) => println!("{} {}", style("unavailable:").red(), e),
    }

    let store = services.vector_store();
    print!("Vector store: {} ... ", store.backend_name());
    if store.is_connected().await {
        println!("{}", style("connected").green());
        match store.list_collections().await {
            Ok(collections) if collections.is_empty() => println!("  No collections yet"),
            Ok(collections) => {
                for name in collections {
                    println!("  - {}", name);
                }
            }
            Err(e) => println!("  Could not list collections: {}", e),
        }
    } else {
        println!("{}", style("unreachable").red());
    }

    let cache = services.cache().get_stats();
    println!(
        "Cache: {} ({} entries)",
        if cache.enabled { "enabled" } else { "disabled" },
        cache.total_entries
    );

    services.shutdown().await;
    Ok(())
}

#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let store = create_vector_store(config).await?;
    let collections = store.list_collections().await?;

    if collections.is_empty() {
        println!("No collections found.");
        return Ok(());
    }
    println!("Collections ({} total):", collections.len());
    for name in collections {
        println!("  {}", name);
    }
    Ok(())
}

#[inline]
pub async fn create_collection(config: &Config, name: &str, dimension: Option<usize>) -> Result<()> {
    let dimension = dimension.unwrap_or_else(|| config.embedding_dimension());
    let store = create_vector_store(config).await?;
    store.create_collection(name, dimension).await?;
    println!("Created collection {} ({} dimensions)", name, dimension);
    Ok(())
}

#[inline]
pub async fn delete_collection(config: &Config, name: &str) -> Result<()> {
    let store = create_vector_store(config).await?;
    store.delete_collection(name).await?;
    println!("Deleted collection {}", name);
    Ok(())
}

#[inline]
pub async fn add_profile(config: &Config, json: &str) -> Result<()> {
    let profile: CompanyProfile = read_json_arg(json)?;
    let services = Services::initialize(config.clone()).await?;
    services.engine().add_company_profile(&profile).await?;
    println!("Stored company profile {} ({})", profile.name, profile.id);
    services.shutdown().await;
    Ok(())
}

#[inline]
pub async fn add_opportunities(config: &Config, json: &str) -> Result<()> {
    let opportunities = read_opportunities(json)?;
    let services = Services::initialize(config.clone()).await?;
    let summary = services.engine().add_opportunities(&opportunities).await?;
    println!(
        "Stored {} opportunities ({} skipped)",
        summary.upserted, summary.skipped
    );
    services.shutdown().await;
    Ok(())
}

#[inline]
pub async fn search(
    config: &Config,
    text: &str,
    collection: Option<&str>,
    top_k: Option<usize>,
    filters: &MatchFilters,
) -> Result<()> {
    let services = Services::initialize(config.clone()).await?;
    let collection = collection.unwrap_or(&config.matching.opportunities_collection);
    let top_k = top_k.unwrap_or(config.matching.top_k);

    let outcome = services
        .engine()
        .query(QueryInput::Text(text.to_string()), collection, top_k, filters)
        .await?;
    print_outcome(&outcome);

    services.shutdown().await;
    Ok(())
}

#[inline]
pub async fn match_profile(config: &Config, json: &str, top_k: Option<usize>) -> Result<()> {
    let profile: CompanyProfile = read_json_arg(json)?;
    let services = Services::initialize(config.clone()).await?;
    let top_k = top_k.unwrap_or(config.matching.top_k);

    let outcome = services
        .engine()
        .match_profile(&profile, top_k, &MatchFilters::default())
        .await?;
    println!("Matches for {} ({}):", profile.name, profile.id);
    print_outcome(&outcome);

    services.shutdown().await;
    Ok(())
}

/// Run the real-time matcher for the given profiles until Ctrl-C
#[inline]
pub async fn watch(config: &Config, profiles: &[String]) -> Result<()> {
    let profiles = profiles
        .iter()
        .map(|json| read_json_arg::<CompanyProfile>(json))
        .collect::<Result<Vec<_>>>()?;
    let services = Services::initialize(config.clone()).await?;

    for profile in &profiles {
        services.matcher().start(profile.clone())?;
        println!("Watching matches for {} ({})", profile.name, profile.id);
    }
    println!(
        "Checking every {}s; press Ctrl-C to stop.",
        config.matcher.check_interval_ms / 1000
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, stopping matcher");

    for profile in &profiles {
        let alerts = services.matcher().get_alerts(&profile.id).await;
        println!(
            "{}: {} alerts ({} unread)",
            profile.id,
            alerts.len(),
            alerts.iter().filter(|a| !a.read).count()
        );
        for alert in alerts {
            println!(
                "  {:>5.1}  {}  {}",
                alert.score * 100.0,
                alert.opportunity_id,
                alert.opportunity_title
            );
        }
    }

    services.shutdown().await;
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    if outcome.results.is_empty() {
        println!("No matches found.");
    }
    for (rank, result) in outcome.results.iter().enumerate() {
        let opportunity = &result.opportunity;
        println!(
            "{:>3}. {} {}",
            rank + 1,
            style(format!("[{:.3}]", result.score)).cyan(),
            style(&opportunity.title).bold()
        );
        println!("     id: {}", opportunity.id);
        if let Some(agency) = &opportunity.agency {
            println!("     agency: {}", agency);
        }
        if !opportunity.naics_codes.is_empty() {
            println!("     NAICS: {}", opportunity.naics_codes.join(", "));
        }
        if let Some(deadline) = opportunity.response_deadline {
            println!("     responds by: {}", deadline);
        }
    }
    if outcome.skipped_records > 0 {
        println!(
            "{} {} records skipped for a dimension mismatch",
            style("!").yellow(),
            outcome.skipped_records
        );
    }
    println!("Total: {}", outcome.total_results);
}
