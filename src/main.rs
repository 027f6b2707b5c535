//! taleforge - narrative prose to game-world graph
//!
//! Usage:
//!   taleforge ingest story.txt      Run the pipeline on one document
//!   taleforge index                 Embed the static registries
//!   taleforge config                Show the effective pipeline config
//!   taleforge --help                Show all commands

use anyhow::Result;
use clap::Parser;

use taleforge::cli::Cli;
use taleforge::init::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taleforge=info".parse()?),
        )
        .init();

    let ctx = AppContext::new(cli.data_path.clone()).await?;
    taleforge::cli::execute(&cli.command, &ctx, cli.json).await
}
