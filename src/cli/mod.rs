//! CLI interface for taleforge.

pub mod handlers;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// taleforge - turn narrative prose into a game-world graph
#[derive(Parser)]
#[command(name = "taleforge", version, about, long_about = None)]
pub struct Cli {
    /// Override data directory (default: ~/.taleforge)
    #[arg(long, env = "TALEFORGE_DATA_PATH", global = true)]
    pub data_path: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline on one raw-text document
    Ingest {
        /// UTF-8 text file
        file: PathBuf,
        /// Stable document id (default: derived from the file name)
        #[arg(long)]
        document_id: Option<String>,
        /// Episodes processed concurrently in the Micro-Pass
        #[arg(long)]
        concurrency: Option<usize>,
        /// Skip arc detection
        #[arg(long)]
        no_arcs: bool,
        /// Skip stat normalization
        #[arg(long)]
        no_normalize: bool,
    },

    /// Embed the static registries into the ontology collection
    Index {
        /// Re-embed even if the stored registry version is current
        #[arg(long)]
        force: bool,
    },

    /// Print the effective pipeline configuration as TOML
    Config,
}

pub async fn execute(
    command: &Commands,
    ctx: &crate::init::AppContext,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Ingest {
            file,
            document_id,
            concurrency,
            no_arcs,
            no_normalize,
        } => {
            let options = handlers::ingest::IngestOptions {
                document_id: document_id.clone(),
                concurrency: *concurrency,
                detect_arcs: !no_arcs,
                normalize_stats: !no_normalize,
            };
            handlers::ingest::handle_ingest(ctx, file, options, json).await?
        }
        Commands::Index { force } => handlers::index::handle_index(ctx, *force, json).await?,
        Commands::Config => handlers::config::handle_config(ctx)?,
    }
    Ok(())
}
