//! Run command handler
//!
//! Executes the pipeline in the foreground with the same configuration the
//! scheduled runner uses, then prints the step records and the link.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::*;
use tally_core::domain::run::StepStatus;
use tally_core::dto::report::RunReport;
use tally_runner::config::Config;
use tally_runner::pipeline::{Services, run_pipeline, write_report};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::{colorize_status, resolve_run_date};

/// Handle the run command
///
/// Exits the process with the run's exit code when it did not succeed.
pub async fn handle_run_command(
    date: Option<String>,
    report: Option<PathBuf>,
    queries_dir: Option<PathBuf>,
) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_runner=warn,tally_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if queries_dir.is_some() {
        config.queries_dir = queries_dir;
    }
    if report.is_some() {
        config.report_path = report;
    }
    config.validate().context("Invalid configuration")?;

    let run_date = resolve_run_date(date.as_deref())?;
    let services = Services::from_config(&config)?;

    println!(
        "{} {} for {}",
        "▸".cyan(),
        "Running monthly balance export".bold(),
        run_date
    );

    let outcome = run_pipeline(&config, &services, run_date).await?;
    let exit_code = outcome.exit_code();
    let report = outcome.into_report();

    print_report(&report);

    if let Some(path) = &config.report_path {
        write_report(&report, path)?;
        println!("  Report:   {}", path.display().to_string().dimmed());
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Run Details:".bold());
    println!("  ID:       {}", report.run_id.to_string().cyan());
    println!("  Period:   {}", report.period);
    println!("  Status:   {}", colorize_status(&report.status));

    println!("\n{}", "Steps:".bold());
    for step in &report.steps {
        let marker = match step.status {
            StepStatus::Succeeded => "✓".green(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Skipped => "-".dimmed(),
            _ => "?".yellow(),
        };
        println!("  {} {:<16} {}", marker, step.name, step.status.to_string().dimmed());
        if let Some(error) = &step.error {
            println!("      {}", error.red());
        }
    }

    if let Some(artifact) = &report.artifact {
        println!("\n  Extract:  {}", artifact);
    }
    if let Some(link) = &report.link {
        println!("  Link:     {}", link.url);
        println!(
            "  Expires:  {}",
            link.expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
        );
    }
    println!("  Exit:     {}", report.exit_code);
}
