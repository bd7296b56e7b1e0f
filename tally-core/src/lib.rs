//! Tally Core
//!
//! Core types and abstractions for the Tally monthly balance export pipeline.
//!
//! This crate contains:
//! - Domain types: Core business entities (Run, ReportingPeriod, artifacts, pipeline graph)
//! - DTOs: Serializable summaries handed to the scheduler and operators

pub mod domain;
pub mod dto;
