use std::path::PathBuf;

use anyhow::Result;
use bidmatch::commands::{
    add_opportunities, add_profile, configure, create_collection, delete_collection,
    list_collections, match_profile, search, show_status, watch,
};
use bidmatch::config::Config;
use bidmatch::matching::MatchFilters;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bidmatch")]
#[command(about = "Match company profiles against contract opportunities by vector similarity")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the local vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or show the effective settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Probe the embedding provider and vector store
    Status,
    /// Manage vector collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Store a company profile (inline JSON or a path to a JSON file)
    AddProfile { json: String },
    /// Store one opportunity or an array of them (inline JSON or a path)
    AddOpportunities { json: String },
    /// Search a collection with free text
    Search {
        text: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        /// Only records whose metadata type matches, e.g. "opportunity"
        #[arg(long = "type")]
        record_type: Option<String>,
        /// Only records with one of these NAICS codes
        #[arg(long)]
        naics: Vec<String>,
    },
    /// Rank opportunities against a company profile
    Match {
        profile: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Run the real-time matcher for one or more profiles until Ctrl-C
    Watch {
        #[arg(required = true)]
        profiles: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    List,
    Create {
        name: String,
        /// Defaults to the configured embedding dimension
        #[arg(long)]
        dimension: Option<usize>,
    },
    Delete {
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            configure(&config, show)?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Collections { action } => match action {
            CollectionAction::List => list_collections(&config).await?,
            CollectionAction::Create { name, dimension } => {
                create_collection(&config, &name, dimension).await?;
            }
            CollectionAction::Delete { name } => delete_collection(&config, &name).await?,
        },
        Commands::AddProfile { json } => {
            add_profile(&config, &json).await?;
        }
        Commands::AddOpportunities { json } => {
            add_opportunities(&config, &json).await?;
        }
        Commands::Search {
            text,
            collection,
            top_k,
            record_type,
            naics,
        } => {
            let filters = MatchFilters {
                record_type,
                naics_codes: naics,
                ..MatchFilters::default()
            };
            search(&config, &text, collection.as_deref(), top_k, &filters).await?;
        }
        Commands::Match { profile, top_k } => {
            match_profile(&config, &profile, top_k).await?;
        }
        Commands::Watch { profiles } => {
            watch(&config, &profiles).await?;
        }
    }

    Ok(())
}
