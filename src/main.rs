//! Podgraph - topic clustering and evolution tracking for podcast knowledge graphs
//!
//! Usage:
//!   podgraph run                 Re-cluster everything into a fresh live generation
//!   podgraph snapshot 2023Q1     Cluster one historical period
//!   podgraph compare 2023Q1 2023Q2   Record evolution between two snapshots
//!   podgraph status              Show the live generation and latest run
//!   podgraph --help              Show all commands

use anyhow::Result;
use clap::Parser;

use podgraph::cli::output::OutputMode;
use podgraph::cli::{Cli, Commands};
use podgraph::init::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr so JSON output on stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("podgraph=info".parse()?),
        )
        .init();

    let mode = OutputMode::from_json_flag(cli.json);

    let mut ctx = AppContext::new(cli.data_path.clone()).await?;
    podgraph::cli::execute(&cli.command, &mut ctx, mode).await?;

    Ok(())
}
