use tracing::{debug, error, info, warn};

use super::{next_step, rules, RunnerContext};
use crate::domain::{HistoryRecord, HistoryStatus, Request, RequestStatus};
use crate::error::Result;
use crate::notifications::{notify, NotificationKind};

/// Assigns imported requests to a process
///
/// Rules of the request's connector are tried by ascending position; the
/// first one that matches decides the process.
pub struct RequestMatchingRunner {
    context: RunnerContext,
}

impl RequestMatchingRunner {
    /// Create a runner
    pub fn new(context: RunnerContext) -> Self {
        Self { context }
    }

    /// Match every imported request, returning how many were matched
    pub async fn run(&self) -> usize {
        let requests = match self
            .context
            .repositories
            .requests
            .find_by_status(RequestStatus::Imported)
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                error!("Could not read the imported requests: {}", e);
                return 0;
            }
        };

        let mut matched = 0;

        for request in requests {
            let request_id = request.id;

            match self.match_request(request).await {
                Ok(true) => matched += 1,
                Ok(false) => {}
                Err(e) => error!(request_id, "Could not match the request: {}", e),
            }
        }

        if matched > 0 {
            info!(matched, "Requests matched to a process");
        }

        matched
    }

    async fn match_request(&self, mut request: Request) -> Result<bool> {
        let mut rules = match request.connector_id {
            Some(connector_id) => {
                self.context
                    .repositories
                    .rules
                    .find_active_by_connector(connector_id)
                    .await?
            }
            None => Vec::new(),
        };
        rules.sort_by_key(|rule| rule.position);

        let process_id = rules
            .iter()
            .find(|rule| rules::matches(&rule.expression, &request))
            .map(|rule| rule.process_id);

        match process_id {
            Some(process_id) => {
                debug!(request_id = request.id, process_id, "Request matched");
                request.process_id = Some(process_id);
                request.status = RequestStatus::Ongoing;
                request.tasknum = 1;
                self.context.repositories.requests.save(&request).await?;
                Ok(true)
            }
            None => {
                warn!(request_id = request.id, label = %request.label(), "No process matches the request");
                self.reject_unmatched(request).await?;
                Ok(false)
            }
        }
    }

    async fn reject_unmatched(&self, mut request: Request) -> Result<()> {
        let history = &self.context.repositories.history;
        let previous = history.find_by_request_order_by_step_desc(request.id).await?;

        let mut record = HistoryRecord::ongoing(
            request.id,
            next_step(&previous),
            0,
            self.context.message("requestHistory.matching.label"),
        );
        record.close(
            HistoryStatus::Error,
            self.context.message("requestMatching.noMatch"),
        );
        history.save(&record).await?;

        request.status = RequestStatus::Error;
        let request = self.context.repositories.requests.save(&request).await?;

        let recipients = self.context.administrator_addresses().await;
        let body = format!(
            "No process matches the request \"{}\" (client: {}, organism: {}).",
            request.label(),
            request.client,
            request.organism
        );
        notify(
            self.context.email_settings.as_ref(),
            NotificationKind::UnmatchedRequest,
            recipients,
            "email.unmatched.subject",
            body,
        )
        .await;

        Ok(())
    }
}
