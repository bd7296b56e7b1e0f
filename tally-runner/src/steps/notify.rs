//! Chat notification step

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::domain::pipeline::{DOWNLOAD_URL, NOTIFY};
use tally_core::domain::run::RunStatus;

use crate::context::RunContext;
use crate::error::{ErrorKind, StepError, StepResult};
use crate::service::ChatSink;
use crate::steps::Step;
use crate::templates::{NOTIFICATION, NotificationParams, QueryTemplates};

/// Posts the download link to chat
pub struct Notify {
    chat: Arc<dyn ChatSink>,
    templates: Arc<QueryTemplates>,
    table: String,
}

impl Notify {
    pub fn new(chat: Arc<dyn ChatSink>, templates: Arc<QueryTemplates>, table: String) -> Self {
        Self {
            chat,
            templates,
            table,
        }
    }
}

#[async_trait]
impl Step for Notify {
    fn name(&self) -> &'static str {
        NOTIFY
    }

    fn phase(&self) -> RunStatus {
        RunStatus::Notifying
    }

    /// The extract and its link already exist, so losing the message only degrades the run
    fn degrades_on(&self, error: &StepError) -> bool {
        matches!(error.kind, ErrorKind::Delivery | ErrorKind::Timeout)
    }

    async fn run(&self, ctx: &RunContext) -> StepResult<()> {
        let link = ctx.link(DOWNLOAD_URL)?;
        if !link.is_well_formed() {
            return Err(StepError::precondition(format!(
                "refusing to send malformed download URL '{}'",
                link.url
            )));
        }

        let params = NotificationParams {
            period: ctx.period.label(),
            table: self.table.clone(),
            run_date: ctx.run_date.to_string(),
            url: link.url.clone(),
            expires_at: link.expires_at.to_rfc3339(),
        };
        let text = self
            .templates
            .render(NOTIFICATION, &params)
            .map_err(|e| StepError::configuration(e.to_string()))?;

        self.chat.send(&text).await?;
        ctx.log_info(NOTIFY, "Posted download link to chat");
        Ok(())
    }
}
