//! CLI interface for podgraph.

pub mod handlers;
pub mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::init::AppContext;
use output::OutputMode;

/// Podgraph - topic clustering and evolution tracking for podcast knowledge graphs
#[derive(Parser)]
#[command(name = "podgraph", version, about, long_about = None)]
pub struct Cli {
    /// Override data directory (default: ~/.podgraph)
    #[arg(long, env = "PODGRAPH_DATA_PATH", global = true)]
    pub data_path: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-cluster all embedded units and replace the live topic generation
    Run,

    /// Cluster a historical period without touching the live generation
    Snapshot {
        /// Period identifier (e.g. 2023Q1)
        period: String,
    },

    /// Compare two snapshot generations and record evolution edges
    Compare {
        /// Older period identifier
        from: String,
        /// Newer period identifier
        to: String,
    },

    /// Show the live generation and latest run
    Status,
}

/// Dispatch a parsed command against the application context.
pub async fn execute(command: &Commands, ctx: &mut AppContext, mode: OutputMode) -> Result<()> {
    match command {
        Commands::Run => handlers::run::handle_run(ctx, mode).await,
        Commands::Snapshot { period } => handlers::run::handle_snapshot(ctx, period, mode).await,
        Commands::Compare { from, to } => handlers::run::handle_compare(ctx, from, to, mode).await,
        Commands::Status => handlers::status::handle_status(ctx, mode).await,
    }
}
