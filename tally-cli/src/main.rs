//! Tally CLI
//!
//! Operator interface to the monthly balance export: run it by hand,
//! inspect the SQL a run would execute, and re-issue download links.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Monthly account balance export", long_about = None)]
struct Cli {
    /// Directory whose files replace the bundled templates
    #[arg(long, global = true, env = "TALLY_QUERIES_DIR")]
    queries_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    handle_command(cli.command, cli.queries_dir).await
}
