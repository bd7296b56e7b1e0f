//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod link;
mod plan;
mod render;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;
use colored::*;
use tally_core::domain::run::RunStatus;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Execute the pipeline once
    Run {
        /// Logical run date (YYYY-MM-DD or RFC 3339); defaults to TALLY_RUN_DATE or today
        #[arg(long)]
        date: Option<String>,

        /// Write the JSON run report here
        #[arg(long, env = "TALLY_REPORT_PATH")]
        report: Option<PathBuf>,
    },
    /// Print the SQL a run would execute, without connecting to anything
    Render {
        /// Logical run date; defaults to TALLY_RUN_DATE or today
        #[arg(long)]
        date: Option<String>,

        /// Only print this template (e.g. insert_period.sql)
        #[arg(long)]
        statement: Option<String>,

        /// fetch or unload
        #[arg(long, env = "TALLY_EXTRACT_MODE", default_value = "fetch")]
        mode: String,
    },
    /// Print the validated step order
    Plan,
    /// Re-issue a download link for an existing extract
    Link {
        /// Reporting period, YYYY-MM
        #[arg(long)]
        period: String,

        /// Link lifetime in seconds; defaults to TALLY_LINK_EXPIRY_SECS
        #[arg(long)]
        expires: Option<u64>,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, queries_dir: Option<PathBuf>) -> Result<()> {
    match command {
        Commands::Run { date, report } => run::handle_run_command(date, report, queries_dir).await,
        Commands::Render {
            date,
            statement,
            mode,
        } => render::handle_render_command(date, statement, &mode, queries_dir),
        Commands::Plan => plan::handle_plan_command(),
        Commands::Link { period, expires } => link::handle_link_command(&period, expires).await,
    }
}

/// Explicit `--date`, else the scheduler variable, else today
fn resolve_run_date(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(raw) => tally_runner::trigger::parse_run_date(raw),
        None => tally_runner::trigger::run_date_from_env(),
    }
}

fn colorize_status(status: &RunStatus) -> ColoredString {
    match status {
        RunStatus::Succeeded => status.to_string().green(),
        RunStatus::Degraded => status.to_string().yellow(),
        RunStatus::Failed => status.to_string().red(),
        _ => status.to_string().cyan(),
    }
}
