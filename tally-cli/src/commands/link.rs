//! Link command handler
//!
//! Recovery path for a degraded run: the extract is already in the bucket,
//! so a fresh signed URL can be produced without running the pipeline.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::*;
use tally_core::domain::period::ReportingPeriod;
use tally_runner::config::Config;
use tally_runner::pipeline::Services;
use tally_runner::steps::GenerateLink;

/// Handle the link command
pub async fn handle_link_command(period: &str, expires: Option<u64>) -> Result<()> {
    let period: ReportingPeriod = period.parse()?;
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let expires_in = expires.map(Duration::from_secs).unwrap_or(config.link_expiry);
    let services = Services::from_config(&config)?;
    let key = period.object_key(&config.tables.key_prefix);

    let info = services.store.head(&key).await.with_context(|| {
        format!("No extract for {} at s3://{}/{}", period, services.store.bucket(), key)
    })?;

    let generator = GenerateLink::new(services.store.clone(), expires_in)?;
    let link = generator.sign(&key, Utc::now()).await?;

    println!("{}", format!("Download link for {}:", period).bold());
    println!("  Object:   s3://{}/{}", services.store.bucket(), key);
    if let Some(size) = info.content_length {
        println!("  Size:     {} bytes", size);
    }
    println!(
        "  Expires:  {}",
        link.expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
    );
    println!();
    println!("{}", link.url.cyan());

    Ok(())
}
