//! SQL and message templates
//!
//! Templates use Jinja syntax (`{{ params.table }}`) rendered with
//! minijinja in strict mode, so a placeholder without a value is an error
//! instead of silently rendering as an empty string. The bundled templates
//! are compiled into the binary; a directory can override any of them by
//! file name.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use tally_core::domain::period::{PeriodError, ReportingPeriod};

use crate::config::TableConfig;

pub const CREATE_TABLE: &str = "create_table.sql";
pub const DELETE_PERIOD: &str = "delete_period.sql";
pub const INSERT_PERIOD: &str = "insert_period.sql";
pub const SELECT_PERIOD: &str = "select_period.sql";
pub const UNLOAD_PERIOD: &str = "unload_period.sql";
pub const NOTIFICATION: &str = "notification.txt";

const BUNDLED: [(&str, &str); 6] = [
    (CREATE_TABLE, include_str!("../queries/create_table.sql")),
    (DELETE_PERIOD, include_str!("../queries/delete_period.sql")),
    (INSERT_PERIOD, include_str!("../queries/insert_period.sql")),
    (SELECT_PERIOD, include_str!("../queries/select_period.sql")),
    (UNLOAD_PERIOD, include_str!("../queries/unload_period.sql")),
    (NOTIFICATION, include_str!("../queries/notification.txt")),
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template '{0}'")]
    Unknown(String),

    #[error("no reporting period for the run date: {0}")]
    Period(#[from] PeriodError),

    #[error("failed to read template override {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template '{name}' is invalid: {source}")]
    Syntax {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to render '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Values available to the SQL templates as `params.*`
#[derive(Debug, Clone, Serialize)]
pub struct QueryParams {
    pub database: String,
    pub schema_origin: String,
    pub schema_destination: String,
    pub source_table: String,
    pub table: String,
    pub stage: Option<String>,
    pub run_date: String,
    /// `YYYY-MM`
    pub period: String,
    /// First day of the period, inclusive
    pub period_start: String,
    /// First day of the next period, exclusive
    pub period_end: String,
    pub object_key: String,
}

impl QueryParams {
    pub fn new(tables: &TableConfig, run_date: NaiveDate) -> Result<Self, PeriodError> {
        let period = ReportingPeriod::containing(run_date)?;
        Ok(Self {
            database: tables.database.clone(),
            schema_origin: tables.schema_origin.clone(),
            schema_destination: tables.schema_destination.clone(),
            source_table: tables.source_table.clone(),
            table: tables.table.clone(),
            stage: tables.stage.clone(),
            run_date: run_date.format("%Y-%m-%d").to_string(),
            period: period.label(),
            period_start: period.start().format("%Y-%m-%d").to_string(),
            period_end: period.end_exclusive().format("%Y-%m-%d").to_string(),
            object_key: period.object_key(&tables.key_prefix),
        })
    }
}

/// Values available to the chat message template as `params.*`
#[derive(Debug, Clone, Serialize)]
pub struct NotificationParams {
    pub period: String,
    pub table: String,
    pub run_date: String,
    pub url: String,
    pub expires_at: String,
}

/// The set of templates used by one run
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    sources: BTreeMap<&'static str, String>,
}

impl QueryTemplates {
    /// Templates compiled into the binary
    pub fn bundled() -> Self {
        Self {
            sources: BUNDLED
                .iter()
                .map(|(name, source)| (*name, source.to_string()))
                .collect(),
        }
    }

    /// Bundled templates, with any same-named file in `dir` taking precedence
    ///
    /// # Arguments
    ///
    /// * `dir` - Override directory; `None` keeps the bundled set
    ///
    /// # Returns
    ///
    /// The compiled templates, or the first unreadable or invalid override
    pub fn load(dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut templates = Self::bundled();

        if let Some(dir) = dir {
            for (name, _) in BUNDLED {
                let path = dir.join(name);
                if !path.is_file() {
                    continue;
                }
                let source = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                debug!("Using template override {}", path.display());
                templates.sources.insert(name, source);
            }
        }

        templates.check()?;
        Ok(templates)
    }

    /// Parses every template once so syntax errors surface before any step runs
    fn check(&self) -> Result<(), TemplateError> {
        let mut env = Environment::new();
        for (name, source) in &self.sources {
            env.add_template(name, source).map_err(|source| TemplateError::Syntax {
                name: name.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Raw source of a template
    pub fn source(&self, name: &str) -> Result<&str, TemplateError> {
        self.sources
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))
    }

    /// Renders `name` with `params` bound as `params`
    pub fn render<P: Serialize>(&self, name: &str, params: &P) -> Result<String, TemplateError> {
        let source = self.source(name)?;

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template(name, source).map_err(|source| TemplateError::Syntax {
            name: name.to_string(),
            source,
        })?;

        let render_err = |source| TemplateError::Render {
            name: name.to_string(),
            source,
        };
        let template = env.get_template(name).map_err(render_err)?;
        let rendered = template.render(context! { params => params }).map_err(render_err)?;
        Ok(rendered.trim().to_string())
    }
}
