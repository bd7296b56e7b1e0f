//! Plan command handler

use anyhow::Result;
use colored::*;
use tally_core::domain::pipeline::PipelineGraph;

/// Print the validated execution order with each step's inputs and outputs
pub fn handle_plan_command() -> Result<()> {
    let pipeline = PipelineGraph::monthly_balance().validate()?;

    println!(
        "{}",
        format!("Pipeline {} ({} steps):", pipeline.name, pipeline.steps.len()).bold()
    );
    println!();
    for (index, step) in pipeline.steps.iter().enumerate() {
        println!("  {} {}", format!("{}.", index + 1).cyan(), step.name.bold());
        if !step.depends_on.is_empty() {
            println!("     after:    {}", step.depends_on.join(", ").dimmed());
        }
        if !step.consumes.is_empty() {
            println!("     consumes: {}", step.consumes.join(", "));
        }
        if !step.produces.is_empty() {
            println!("     produces: {}", step.produces.join(", ").green());
        }
    }

    Ok(())
}
