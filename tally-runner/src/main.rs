//! Tally Runner binary
//!
//! One process per scheduled run. The exit code tells the scheduler what
//! happened; see [`tally_runner::execution::exit_codes`].

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_runner::config::Config;
use tally_runner::execution::exit_codes;
use tally_runner::pipeline::{Services, run_pipeline, write_report};
use tally_runner::trigger::run_date_from_env;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_runner=info,tally_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tally Runner");

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return exit_codes::CONFIGURATION;
        }
    };

    let (services, run_date) = match prepare(&config) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Failed to initialize run: {:#}", e);
            return exit_codes::CONFIGURATION;
        }
    };

    let outcome = match run_pipeline(&config, &services, run_date).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Failed to start run: {:#}", e);
            return exit_codes::CONFIGURATION;
        }
    };

    let exit_code = outcome.exit_code();
    let report = outcome.into_report();
    match &report.error {
        Some(err) => warn!("Run {} finished as {}: {}", report.run_id, report.status, err),
        None => info!("Run {} finished as {}", report.run_id, report.status),
    }

    if let Some(path) = &config.report_path {
        match write_report(&report, path) {
            Ok(()) => info!("Wrote run report to {}", path.display()),
            Err(e) => error!("{:#}", e),
        }
    }

    exit_code
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: table={}, bucket={}, mode={:?}",
        config.tables.qualified_table(),
        config.storage.bucket,
        config.extract_mode
    );
    Ok(config)
}

fn prepare(config: &Config) -> Result<(Services, chrono::NaiveDate)> {
    let services = Services::from_config(config).context("Failed to initialize services")?;
    let run_date = run_date_from_env()?;
    info!("Services initialized, run date {}", run_date);
    Ok((services, run_date))
}
