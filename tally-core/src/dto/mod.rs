//! Data Transfer Objects
//!
//! Serializable views of finished runs, written to disk for the host
//! scheduler and printed by the CLI.

pub mod report;
