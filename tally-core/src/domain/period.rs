//! Reporting period domain types
//!
//! A run is parameterized by its logical run date. The extract covers the
//! calendar month containing that date, as a half-open range
//! `[first day, first day of next month)`.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// File extension of the generated extract
pub const EXTRACT_EXTENSION: &str = "csv";

/// Errors produced while parsing or building a period
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("invalid period '{0}': expected YYYY-MM")]
    InvalidFormat(String),

    #[error("month {0} is out of range")]
    InvalidMonth(u32),

    #[error("year {0} is out of range")]
    InvalidYear(i32),
}

/// A calendar month between 0001-01 and 9999-12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportingPeriod {
    /// First day of the month
    start: NaiveDate,
}

impl ReportingPeriod {
    /// Creates a period from a year and a 1-based month
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        // Keep the label a fixed four-digit year so keys sort and never collide
        if !(1..=9999).contains(&year) {
            return Err(PeriodError::InvalidYear(year));
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or(PeriodError::InvalidYear(year))?;
        Ok(Self { start })
    }

    /// The month containing `run_date`
    ///
    /// Fails for dates outside years 1..=9999, which have no `YYYY-MM` label.
    pub fn containing(run_date: NaiveDate) -> Result<Self, PeriodError> {
        Self::new(run_date.year(), run_date.month())
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    /// First day of the period (inclusive bound)
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day of the following month (exclusive bound)
    pub fn end_exclusive(&self) -> NaiveDate {
        // 9999-12 still has a successor inside chrono's range
        self.start
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX)
    }

    /// `YYYY-MM` label used in keys, SQL and messages
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year(), self.month())
    }

    /// Object key of the period's extract: `<prefix>/<YYYY-MM>.csv`
    ///
    /// Distinct periods always map to distinct keys under the same prefix.
    pub fn object_key(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}.{}", self.label(), EXTRACT_EXTENSION)
        } else {
            format!("{}/{}.{}", prefix, self.label(), EXTRACT_EXTENSION)
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ReportingPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeriodError::InvalidFormat(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for ReportingPeriod {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportingPeriod> for String {
    fn from(period: ReportingPeriod) -> Self {
        period.label()
    }
}
