//! Render command handler
//!
//! Dry run: prints the statements for a run date. Only the table naming
//! variables are needed, so no credentials have to be present.

use std::path::PathBuf;

use anyhow::{Result, bail};
use colored::*;
use tally_runner::config::{ExtractMode, TableConfig};
use tally_runner::pipeline::RenderedQueries;
use tally_runner::templates::QueryTemplates;

use super::resolve_run_date;

/// Handle the render command
pub fn handle_render_command(
    date: Option<String>,
    statement: Option<String>,
    mode: &str,
    queries_dir: Option<PathBuf>,
) -> Result<()> {
    let tables = TableConfig::from_env()?;
    tables.validate()?;
    let mode: ExtractMode = mode.parse()?;
    if mode == ExtractMode::Unload && tables.stage.is_none() {
        bail!("TALLY_STAGE is required to render unload statements");
    }

    let run_date = resolve_run_date(date.as_deref())?;
    let templates = QueryTemplates::load(queries_dir.as_deref())?;
    let queries = RenderedQueries::render(&templates, &tables, mode, run_date)?;

    let selected: Vec<_> = queries
        .statements(mode)
        .into_iter()
        .filter(|(name, _)| statement.as_deref().is_none_or(|wanted| wanted == *name))
        .collect();

    if selected.is_empty() {
        let available: Vec<_> = queries.statements(mode).iter().map(|(name, _)| *name).collect();
        bail!(
            "unknown statement '{}' (available: {})",
            statement.unwrap_or_default(),
            available.join(", ")
        );
    }

    for (name, sql) in selected {
        println!("{}", format!("-- {}", name).dimmed());
        println!("{};", sql);
        println!();
    }
    println!(
        "{}",
        format!("-- period {} -> {}", run_date.format("%Y-%m"), queries.object_key).dimmed()
    );

    Ok(())
}
