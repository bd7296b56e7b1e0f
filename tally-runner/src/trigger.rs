//! Schedule trigger
//!
//! The host scheduler passes the logical run date through `TALLY_RUN_DATE`,
//! either as a plain date or as an RFC 3339 timestamp. Without it the run
//! covers today's date in UTC.

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use tally_core::domain::period::ReportingPeriod;

pub const RUN_DATE_VAR: &str = "TALLY_RUN_DATE";

/// Parses `YYYY-MM-DD` or an RFC 3339 datetime (converted to its UTC date)
///
/// Dates outside years 1..=9999 are rejected since their month has no
/// `YYYY-MM` label.
pub fn parse_run_date(raw: &str) -> anyhow::Result<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("run date is empty");
    }

    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc).date_naive())
            .with_context(|| {
                format!("invalid run date '{}' (expected YYYY-MM-DD or RFC 3339)", raw)
            })?,
    };

    ReportingPeriod::containing(date)
        .with_context(|| format!("run date '{}' is out of range", raw))?;
    Ok(date)
}

/// Run date from the environment lookup, falling back to `today`
pub fn run_date_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
    today: NaiveDate,
) -> anyhow::Result<NaiveDate> {
    match lookup(RUN_DATE_VAR).filter(|v| !v.trim().is_empty()) {
        Some(raw) => parse_run_date(&raw).with_context(|| format!("invalid {}", RUN_DATE_VAR)),
        None => Ok(today),
    }
}

/// Run date from the process environment
pub fn run_date_from_env() -> anyhow::Result<NaiveDate> {
    run_date_from_lookup(|key| std::env::var(key).ok(), Utc::now().date_naive())
}
