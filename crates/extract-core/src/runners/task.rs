use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{next_step, CompletionGuard, RunnerContext, TaskCompletionListener};
use crate::domain::{HistoryRecord, HistoryStatus, Request, RequestStatus, Task};
use crate::error::{Error, Result};
use crate::notifications::{notify, NotificationKind};
use crate::plugins::{execute_task_guarded, TaskContext, TaskPluginDiscovery, TaskResult, TaskResultStatus};

/// Longest remark a task may set on a request
pub const MAX_REMARK_LENGTH: usize = 4000;

/// Runs the current task of one request
///
/// The completion listener is notified exactly once when the runner is
/// dropped: after it ran, when it panicked, or when it was aborted before
/// it even started.
pub struct RequestTaskRunner {
    request_id: i64,
    context: RunnerContext,
    plugins: TaskPluginDiscovery,
    _completion: CompletionGuard,
}

impl RequestTaskRunner {
    /// Create a runner for a request
    pub fn new(
        request_id: i64,
        context: RunnerContext,
        plugins: TaskPluginDiscovery,
        listener: Arc<dyn TaskCompletionListener>,
    ) -> Self {
        Self {
            request_id,
            context,
            plugins,
            _completion: CompletionGuard::new(request_id, listener),
        }
    }

    /// Run the current task, then report completion
    pub async fn run(self) {
        if let Err(e) = self.process().await {
            error!(request_id = self.request_id, "The task could not be processed: {}", e);
        }
    }

    async fn process(&self) -> Result<()> {
        let repositories = &self.context.repositories;
        let mut request = repositories
            .requests
            .find_by_id(self.request_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "request",
                id: self.request_id,
            })?;

        if request.status != RequestStatus::Ongoing {
            debug!(request_id = request.id, status = %request.status, "Request is no longer ongoing");
            return Ok(());
        }

        if request.rejected {
            info!(request_id = request.id, "Request rejected, skipping the remaining tasks");
            request.status = RequestStatus::ToExport;
            repositories.requests.save(&request).await?;
            return Ok(());
        }

        let process_id = request.process_id.ok_or_else(|| {
            Error::Internal(format!("request {} has no process", request.id))
        })?;
        let mut tasks = repositories.processes.find_tasks(process_id).await?;
        tasks.sort_by_key(|task| task.position);

        let index = usize::try_from(request.tasknum.max(1) - 1).unwrap_or_default();
        let Some(task) = tasks.get(index) else {
            debug!(request_id = request.id, "All tasks done, request ready for export");
            request.status = RequestStatus::ToExport;
            repositories.requests.save(&request).await?;
            return Ok(());
        };

        let history = repositories.history.find_by_request_order_by_step_desc(request.id).await?;
        let record = HistoryRecord::ongoing(request.id, next_step(&history), task.position, task.label.clone());
        let record = repositories.history.save(&record).await?;

        let Some(plugin) = self.plugins.lookup(&task.code) else {
            let message = format!("Plugin {} not found.", task.code);
            warn!(request_id = request.id, task = %task.label, "{}", message);
            self.fail(request, record, task, message).await?;
            return Ok(());
        };

        info!(request_id = request.id, task = %task.label, plugin = %task.code, "Running task");

        let task_context = TaskContext {
            language: self.context.language.clone(),
            task_label: task.label.clone(),
            parameters: task.parameters.clone(),
        };
        let result = execute_task_guarded(
            plugin.as_ref(),
            &request,
            &task_context,
            self.context.email_settings.as_ref(),
        )
        .await;

        self.handle_result(request, record, task, result).await
    }

    async fn handle_result(
        &self,
        mut request: Request,
        mut record: HistoryRecord,
        task: &Task,
        result: TaskResult,
    ) -> Result<()> {
        let repositories = &self.context.repositories;

        match result.status {
            TaskResultStatus::Success => {
                if let Some(updated) = &result.updated_request {
                    if let Some(message) = self.apply_updates(&mut request, updated) {
                        return self.fail(request, record, task, message).await;
                    }
                }

                let message = if result.message.is_empty() {
                    self.context.message("requestTask.result.null")
                } else {
                    result.message
                };
                record.close(HistoryStatus::Finished, message);
                repositories.history.save(&record).await?;

                request.tasknum += 1;
                repositories.requests.save(&request).await?;
                debug!(request_id = request.id, task = %task.label, "Task succeeded");
            }
            TaskResultStatus::Error => {
                let message = result.error_message();
                self.fail(request, record, task, message).await?;
            }
            TaskResultStatus::Standby => {
                record.close(HistoryStatus::Standby, result.message.clone());
                repositories.history.save(&record).await?;

                request.status = RequestStatus::Standby;
                request.last_reminder = Some(Utc::now());
                let request = repositories.requests.save(&request).await?;
                info!(request_id = request.id, task = %task.label, "Request waiting for an operator");

                self.notify_operators(
                    &request,
                    NotificationKind::TaskStandby,
                    "email.taskStandby.subject",
                    format!(
                        "The task \"{}\" of request \"{}\" requires an operator.\n\n{}",
                        task.label,
                        request.label(),
                        result.message
                    ),
                )
                .await;
            }
            TaskResultStatus::NotRun => {
                debug!(request_id = request.id, task = %task.label, "Task not run, discarding its history record");
                repositories.history.delete(record.id).await?;
            }
        }

        Ok(())
    }

    /// Copy the remark and rejection flag a task set; returns an error message if invalid
    fn apply_updates(&self, request: &mut Request, updated: &Request) -> Option<String> {
        let remark = updated.remark.clone().filter(|remark| !remark.trim().is_empty());

        if let Some(remark) = &remark {
            if remark.chars().count() > MAX_REMARK_LENGTH {
                return Some(self.context.message("requestTask.remark.tooLong"));
            }
        }

        if updated.rejected && remark.is_none() {
            return Some(self.context.message("requestTask.rejected.noRemark"));
        }

        if remark.is_some() {
            request.remark = remark;
        }
        request.rejected = updated.rejected;

        None
    }

    async fn fail(
        &self,
        mut request: Request,
        mut record: HistoryRecord,
        task: &Task,
        message: String,
    ) -> Result<()> {
        let repositories = &self.context.repositories;

        record.close(HistoryStatus::Error, message.clone());
        repositories.history.save(&record).await?;

        request.status = RequestStatus::Error;
        let request = repositories.requests.save(&request).await?;
        warn!(request_id = request.id, task = %task.label, "Task failed: {}", message);

        self.notify_operators(
            &request,
            NotificationKind::TaskFailed,
            "email.taskFailed.subject",
            format!(
                "The task \"{}\" of request \"{}\" failed.\n\n{}",
                task.label,
                request.label(),
                message
            ),
        )
        .await;

        Ok(())
    }

    async fn notify_operators(
        &self,
        request: &Request,
        kind: NotificationKind,
        subject_key: &str,
        body: String,
    ) {
        let recipients = self.context.operator_addresses(request.process_id).await;
        notify(
            self.context.email_settings.as_ref(),
            kind,
            recipients,
            subject_key,
            body,
        )
        .await;
    }
}
