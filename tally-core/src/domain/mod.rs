//! Core domain types
//!
//! This module contains the core domain structures used across Tally crates.
//! These types describe a pipeline run and the values handed from one step
//! to the next; the runner owns their execution, the CLI displays them.

pub mod artifact;
pub mod log;
pub mod period;
pub mod pipeline;
pub mod run;
