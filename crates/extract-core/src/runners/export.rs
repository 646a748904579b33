use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{next_step, RunnerContext};
use crate::domain::{HistoryRecord, HistoryStatus, Request, RequestStatus};
use crate::error::Result;
use crate::notifications::{notify, NotificationKind};
use crate::plugins::{export_result_guarded, ConnectorContext, ConnectorDiscovery};

/// Delivers the results of processed requests through their connector
pub struct ExportRequestsRunner {
    context: RunnerContext,
    plugins: ConnectorDiscovery,
}

impl ExportRequestsRunner {
    /// Create a runner
    pub fn new(context: RunnerContext, plugins: ConnectorDiscovery) -> Self {
        Self { context, plugins }
    }

    /// Export every request waiting for it, returning how many were delivered
    pub async fn run(&self) -> usize {
        let requests = match self
            .context
            .repositories
            .requests
            .find_by_status(RequestStatus::ToExport)
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                error!("Could not read the requests to export: {}", e);
                return 0;
            }
        };

        let mut exported = 0;

        for request in requests {
            let request_id = request.id;

            match self.export(request).await {
                Ok(true) => exported += 1,
                Ok(false) => {}
                Err(e) => error!(request_id, "Could not export the request: {}", e),
            }
        }

        if exported > 0 {
            info!(exported, "Requests exported");
        }

        exported
    }

    async fn export(&self, mut request: Request) -> Result<bool> {
        let repositories = &self.context.repositories;

        let connector = match request.connector_id {
            Some(id) => repositories.connectors.find_by_id(id).await?,
            None => None,
        };
        let Some(connector) = connector else {
            warn!(request_id = request.id, "The request has no connector, it cannot be exported");
            return Ok(false);
        };

        let Some(plugin) = self.plugins.lookup(&connector.code) else {
            warn!(request_id = request.id, connector = %connector.name, plugin = %connector.code, "Connector plugin not found, export postponed");
            return Ok(false);
        };

        let task_count = match request.process_id {
            Some(process_id) => repositories.processes.find_tasks(process_id).await?.len(),
            None => 0,
        };
        let history = repositories.history.find_by_request_order_by_step_desc(request.id).await?;

        let record = HistoryRecord::ongoing(
            request.id,
            next_step(&history),
            i32::try_from(task_count).unwrap_or(i32::MAX - 1) + 1,
            self.context.message("requestHistory.tasks.export.label"),
        );
        let mut record = repositories.history.save(&record).await?;

        debug!(request_id = request.id, connector = %connector.name, "Exporting request");

        let plugin_context = ConnectorContext {
            language: self.context.language.clone(),
            parameters: connector.parameters.clone(),
        };
        let result = export_result_guarded(plugin.as_ref(), &plugin_context, &request).await;

        if result.success {
            record.close(HistoryStatus::Finished, result.message.unwrap_or_default());
            repositories.history.save(&record).await?;

            request.status = RequestStatus::Finished;
            request.end_date = Some(Utc::now());
            repositories.requests.save(&request).await?;
            return Ok(true);
        }

        let message = match (result.message, result.details) {
            (Some(message), Some(details)) => format!("{} - {}", message, details),
            (Some(message), None) => message,
            (None, Some(details)) => details,
            (None, None) => "Export failed".to_string(),
        };
        warn!(request_id = request.id, connector = %connector.name, "The export failed: {}", message);

        record.close(HistoryStatus::Error, message.clone());
        repositories.history.save(&record).await?;

        request.status = RequestStatus::Error;
        let request = repositories.requests.save(&request).await?;

        let mut recipients = self.context.operator_addresses(request.process_id).await;
        for address in self.context.administrator_addresses().await {
            if !recipients.contains(&address) {
                recipients.push(address);
            }
        }

        notify(
            self.context.email_settings.as_ref(),
            NotificationKind::ExportFailed,
            recipients,
            "email.exportFailed.subject",
            format!(
                "The result of request \"{}\" could not be exported through connector \"{}\".\n\n{}",
                request.label(),
                connector.name,
                message
            ),
        )
        .await;

        Ok(false)
    }
}
