//! Tally Runner
//!
//! Executes the monthly account balance export once per invocation.
//!
//! Architecture:
//! - Configuration: Load settings from the environment
//! - Templates: Jinja SQL and message templates, bundled or overridden from disk
//! - Services: Trait seams over Snowflake, S3 and Slack
//! - Steps: Provision, load, link and notify, one per graph node
//! - Executor: Runs the validated graph and produces the run report
//!
//! The host scheduler starts the binary, reads the JSON report and decides
//! whether to retry from the process exit code.

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod pipeline;
pub mod service;
pub mod steps;
pub mod templates;
pub mod trigger;

#[cfg(test)]
mod testing;
