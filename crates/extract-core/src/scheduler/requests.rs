//! Request processing jobs
//!
//! Four recurring jobs share one worker pool and one running-task registry:
//! export, process matching, task execution management and standby
//! reminders. Only the task execution job dispatches work to the pool; the
//! other bodies run on their own tick.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::base::{JobScheduler, SchedulingStep};
use super::pool::WorkerPool;
use super::registrar::{job_fn, JobFn, ScheduledTask, TaskRegistrar};
use super::registry::RunningTaskRegistry;
use crate::domain::{HistoryStatus, Request, RequestStatus};
use crate::error::Result;
use crate::plugins::{ConnectorDiscovery, TaskPluginDiscovery};
use crate::runners::{
    ExportRequestsRunner, RequestMatchingRunner, RequestTaskRunner, RunnerContext,
    StandbyReminderRunner, TaskCompletionListener,
};

#[cfg(test)]
mod tests;

struct ProcessingContext {
    runner_context: RunnerContext,
    task_plugins: TaskPluginDiscovery,
    connector_plugins: ConnectorDiscovery,
    running: RunningTaskRegistry,
    pool: WorkerPool,
}

impl ProcessingContext {
    async fn export_requests(&self) -> usize {
        ExportRequestsRunner::new(self.runner_context.clone(), self.connector_plugins.clone())
            .run()
            .await
    }

    async fn match_requests(&self) -> usize {
        RequestMatchingRunner::new(self.runner_context.clone()).run().await
    }

    async fn send_reminders(&self) -> usize {
        StandbyReminderRunner::new(self.runner_context.clone()).run().await
    }

    async fn manage_task_processing(self: &Arc<Self>) -> Result<usize> {
        let requests = self
            .runner_context
            .repositories
            .requests
            .find_by_status(RequestStatus::Ongoing)
            .await?;

        let mut submitted = 0;

        for request in requests {
            if self.running.contains(request.id) {
                debug!(request_id = request.id, "A task is already running for the request");
                continue;
            }

            match self.check_ongoing_history(&request).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(request_id = request.id, "Could not check the request history: {}", e);
                    continue;
                }
            }

            if !self.running.try_register(request.id) {
                continue;
            }

            let listener: Arc<dyn TaskCompletionListener> = self.clone();
            let runner = RequestTaskRunner::new(
                request.id,
                self.runner_context.clone(),
                self.task_plugins.clone(),
                listener,
            );
            self.pool.submit(runner.run());
            submitted += 1;
        }

        if submitted > 0 {
            debug!(submitted, "Task runners submitted");
        }

        Ok(submitted)
    }

    /// Heal a request whose last task was interrupted
    ///
    /// Returns whether the request can be processed. An ONGOING last record
    /// while no runner holds the request means the process died mid-task.
    async fn check_ongoing_history(&self, request: &Request) -> Result<bool> {
        let repositories = &self.runner_context.repositories;
        let history = repositories
            .history
            .find_by_request_order_by_step_desc(request.id)
            .await?;

        let Some(mut last) = history.into_iter().next() else {
            return Ok(true);
        };

        if last.status != HistoryStatus::Ongoing {
            return Ok(true);
        }

        warn!(
            request_id = request.id,
            task = %last.task_label,
            "The task was interrupted, setting the request in error"
        );

        last.close(
            HistoryStatus::Error,
            self.runner_context.message("errors.task.interrupted"),
        );
        repositories.history.save(&last).await?;

        let mut request = request.clone();
        request.status = RequestStatus::Error;
        repositories.requests.save(&request).await?;

        Ok(false)
    }
}

impl TaskCompletionListener for ProcessingContext {
    fn notify_task_completion(&self, request_id: i64) {
        if request_id < 1 {
            debug!(request_id, "Ignoring completion of an invalid request id");
            return;
        }

        if !self.running.complete(request_id) {
            warn!(request_id, "Completion notified for a request with no running task");
        }
    }
}

struct ProcessingJobs {
    export: ScheduledTask,
    matching: ScheduledTask,
    task_management: ScheduledTask,
    notification: ScheduledTask,
}

impl ProcessingJobs {
    fn is_active(&self) -> bool {
        [&self.export, &self.matching, &self.task_management, &self.notification]
            .iter()
            .all(|task| !task.is_cancelled())
    }
}

/// Scheduler of the request processing jobs
pub struct RequestsProcessingScheduler {
    context: Arc<ProcessingContext>,
    registrar: Arc<TaskRegistrar>,
    step: SchedulingStep,
    jobs: Mutex<Option<ProcessingJobs>>,
}

impl RequestsProcessingScheduler {
    /// Create a scheduler; `max_concurrent_tasks` bounds the worker pool
    pub fn new(
        registrar: Arc<TaskRegistrar>,
        step: SchedulingStep,
        runner_context: RunnerContext,
        task_plugins: TaskPluginDiscovery,
        connector_plugins: ConnectorDiscovery,
        max_concurrent_tasks: Option<usize>,
    ) -> Self {
        Self {
            context: Arc::new(ProcessingContext {
                runner_context,
                task_plugins,
                connector_plugins,
                running: RunningTaskRegistry::new(),
                pool: WorkerPool::new(max_concurrent_tasks),
            }),
            registrar,
            step,
            jobs: Mutex::new(None),
        }
    }

    /// Export pass, returning how many requests were delivered
    pub async fn export_requests(&self) -> usize {
        self.context.export_requests().await
    }

    /// Matching pass, returning how many requests were matched
    pub async fn match_requests(&self) -> usize {
        self.context.match_requests().await
    }

    /// Task management pass, returning how many runners were submitted
    pub async fn manage_task_processing(&self) -> Result<usize> {
        self.context.manage_task_processing().await
    }

    /// Reminder pass, returning how many reminders were sent
    pub async fn send_reminders(&self) -> usize {
        self.context.send_reminders().await
    }

    /// Release a request after its task runner ended
    pub fn notify_task_completion(&self, request_id: i64) {
        self.context.notify_task_completion(request_id);
    }

    /// Requests with a task in flight
    pub fn running_tasks(&self) -> &RunningTaskRegistry {
        &self.context.running
    }

    /// Number of requests with a task in flight
    pub fn running_task_count(&self) -> usize {
        self.context.running.len()
    }

    /// Whether the four jobs are scheduled
    pub async fn is_scheduled(&self) -> bool {
        self.jobs
            .lock()
            .await
            .as_ref()
            .is_some_and(ProcessingJobs::is_active)
    }

    fn schedule(&self, name: &str, job: JobFn) -> ScheduledTask {
        self.registrar
            .schedule_with_fixed_delay(name, self.step.as_duration(), job)
    }
}

#[async_trait]
impl JobScheduler for RequestsProcessingScheduler {
    async fn schedule_jobs(&self) -> Result<()> {
        let mut jobs = self.jobs.lock().await;

        if jobs.as_ref().is_some_and(ProcessingJobs::is_active) {
            debug!("Request processing jobs already scheduled");
            return Ok(());
        }

        if let Some(stale) = jobs.take() {
            stale.export.cancel(false);
            stale.matching.cancel(false);
            stale.task_management.cancel(true);
            stale.notification.cancel(false);
        }

        let context = self.context.clone();
        let export = self.schedule(
            "export-requests",
            job_fn(move || {
                let context = context.clone();
                async move {
                    context.export_requests().await;
                }
            }),
        );

        let context = self.context.clone();
        let matching = self.schedule(
            "request-matching",
            job_fn(move || {
                let context = context.clone();
                async move {
                    context.match_requests().await;
                }
            }),
        );

        let context = self.context.clone();
        let task_management = self.schedule(
            "task-processing",
            job_fn(move || {
                let context = context.clone();
                async move {
                    if let Err(e) = context.manage_task_processing().await {
                        error!("Could not manage the task processing: {}", e);
                    }
                }
            }),
        );

        let context = self.context.clone();
        let notification = self.schedule(
            "standby-reminders",
            job_fn(move || {
                let context = context.clone();
                async move {
                    context.send_reminders().await;
                }
            }),
        );

        *jobs = Some(ProcessingJobs {
            export,
            matching,
            task_management,
            notification,
        });

        info!(step_secs = self.step.as_secs(), "Request processing jobs scheduled");
        Ok(())
    }

    async fn unschedule_jobs(&self) {
        if let Some(jobs) = self.jobs.lock().await.take() {
            jobs.export.cancel(false);
            jobs.matching.cancel(false);
            jobs.notification.cancel(false);
            jobs.task_management.cancel(true);
        }

        let aborted = self.context.pool.shutdown_now();
        if aborted > 0 {
            warn!("{} task(s) could not be completed", aborted);
        }

        info!("Request processing jobs unscheduled");
    }
}
