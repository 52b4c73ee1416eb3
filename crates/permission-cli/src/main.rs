mod commands;
mod logging;
mod wiring;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "permission-registry", version, about = "Maintain the governance permission registry")]
pub struct Cli {
    /// Registry configuration file.
    #[arg(long, env = "PERMISSION_CONFIG", default_value = "permission-registry.json")]
    pub config: PathBuf,

    /// JSON log lines and JSON reports.
    #[arg(long, global = true)]
    pub json: bool,

    /// Print prometheus metrics after the run.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Refresh existing records and add new stakers and subscribers.
    Reconcile {
        #[arg(long)]
        dry_run: bool,
    },
    /// Populate an empty registry from documents and feeds.
    Seed {
        #[arg(long)]
        dry_run: bool,
    },
    /// List registry records, highest permission first.
    Show,
    /// Delete every registry box (testnet only).
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Print the base64 box key of an address.
    ToBytes { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json);
    commands::run(cli).await
}
