//! Per-connector import jobs
//!
//! A meta-job reconciles, at every scheduling step, the active connectors
//! against the import jobs currently scheduled:
//!
//! - a connector without a job gets one (fixed delay, first run immediate)
//! - a connector whose cadence changed is rescheduled
//! - a job whose connector is no longer active is cancelled

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{JobScheduler, SchedulingStep};
use super::job_info::JobSchedulingInfo;
use super::registrar::{job_fn, ScheduledTask, TaskRegistrar};
use crate::domain::Connector;
use crate::error::Result;
use crate::plugins::ConnectorDiscovery;
use crate::runners::{ConnectorImportRunner, RunnerContext};


struct ImportContext {
    registrar: Arc<TaskRegistrar>,
    step: SchedulingStep,
    runner_context: RunnerContext,
    plugins: ConnectorDiscovery,
    jobs: DashMap<i64, JobSchedulingInfo>,
    reconciling: Mutex<()>,
}

impl ImportContext {
    async fn reconcile(&self) -> Result<()> {
        let _pass = self.reconciling.lock().await;

        let connectors = self
            .runner_context
            .repositories
            .connectors
            .find_active()
            .await?;

        let mut stale: HashSet<i64> = self.jobs.iter().map(|entry| *entry.key()).collect();

        for connector in &connectors {
            stale.remove(&connector.id);
            self.reconcile_connector(connector);
        }

        for id in stale {
            if let Some((_, job)) = self.jobs.remove(&id) {
                info!(connector_id = id, "Connector no longer active, cancelling its import job");
                job.cancel_job(false);
            }
        }

        Ok(())
    }

    fn reconcile_connector(&self, connector: &Connector) {
        let delay_ms = connector.import_delay_ms();
        let current = self
            .jobs
            .get(&connector.id)
            .map(|job| job.has_delay_changed(delay_ms));

        if current == Some(false) {
            return;
        }

        let Some(plugin) = self.plugins.lookup(&connector.code) else {
            warn!(connector = %connector.name, plugin = %connector.code, "Connector plugin not found, import skipped");
            if let Some((_, job)) = self.jobs.remove(&connector.id) {
                info!(connector = %connector.name, "Stale import job cancelled until the plugin is back");
                job.cancel_job(false);
            }
            return;
        };

        if let Some((_, job)) = self.jobs.remove(&connector.id) {
            info!(
                connector = %connector.name,
                previous_ms = job.delay_ms(),
                delay_ms,
                "Import cadence changed, rescheduling"
            );
            job.cancel_job(false);
        }

        let runner = Arc::new(ConnectorImportRunner::new(
            connector.id,
            plugin,
            self.runner_context.clone(),
        ));
        let name = format!("import-{}", connector.id);

        let scheduled = JobSchedulingInfo::schedule(connector.id, delay_ms, |delay| {
            self.registrar.schedule_with_fixed_delay(
                name,
                delay,
                job_fn(move || {
                    let runner = runner.clone();
                    async move { runner.run().await }
                }),
            )
        });

        match scheduled {
            Ok(job) => {
                debug!(connector = %connector.name, delay_ms, "Import job scheduled");
                self.jobs.insert(connector.id, job);
            }
            Err(e) => error!(connector = %connector.name, "Could not schedule the import job: {}", e),
        }
    }

    fn cancel_all(&self) -> usize {
        let ids: Vec<i64> = self.jobs.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;

        for id in ids {
            if let Some((_, job)) = self.jobs.remove(&id) {
                job.cancel_job(false);
                cancelled += 1;
            }
        }

        cancelled
    }
}

/// Scheduler owning one import job per active connector
pub struct ImportJobsScheduler {
    context: Arc<ImportContext>,
    meta_task: Mutex<Option<ScheduledTask>>,
}

impl ImportJobsScheduler {
    /// Create a scheduler; nothing runs until [`JobScheduler::schedule_jobs`]
    pub fn new(
        registrar: Arc<TaskRegistrar>,
        step: SchedulingStep,
        runner_context: RunnerContext,
        plugins: ConnectorDiscovery,
    ) -> Self {
        Self {
            context: Arc::new(ImportContext {
                registrar,
                step,
                runner_context,
                plugins,
                jobs: DashMap::new(),
                reconciling: Mutex::new(()),
            }),
            meta_task: Mutex::new(None),
        }
    }

    /// Run one reconciliation pass now
    pub async fn reconcile_import_jobs(&self) -> Result<()> {
        self.context.reconcile().await
    }

    /// Connectors with a scheduled import job, sorted
    pub fn scheduled_job_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.context.jobs.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Cadence of a connector's import job
    pub fn job_delay_ms(&self, connector_id: i64) -> Option<u64> {
        self.context.jobs.get(&connector_id).map(|job| job.delay_ms())
    }

    /// Cancellation token of a connector's import job
    pub fn job_token(&self, connector_id: i64) -> Option<CancellationToken> {
        self.context
            .jobs
            .get(&connector_id)
            .map(|job| job.task().cancellation_token())
    }

    /// Whether the reconciliation job is running
    pub async fn is_scheduled(&self) -> bool {
        self.meta_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_cancelled())
    }
}

#[async_trait]
impl JobScheduler for ImportJobsScheduler {
    async fn schedule_jobs(&self) -> Result<()> {
        let mut meta_task = self.meta_task.lock().await;

        if meta_task.as_ref().is_some_and(|task| !task.is_cancelled()) {
            debug!("Import jobs already scheduled");
            return Ok(());
        }

        let context = self.context.clone();
        let task = self.context.registrar.schedule_with_fixed_delay(
            "import-jobs",
            self.context.step.as_duration(),
            job_fn(move || {
                let context = context.clone();
                async move {
                    if let Err(e) = context.reconcile().await {
                        error!("Could not reconcile the import jobs: {}", e);
                    }
                }
            }),
        );

        *meta_task = Some(task);
        info!(step_secs = self.context.step.as_secs(), "Import jobs scheduled");
        Ok(())
    }

    async fn unschedule_jobs(&self) {
        if let Some(task) = self.meta_task.lock().await.take() {
            task.cancel(true);
        }

        let cancelled = self.context.cancel_all();
        info!(cancelled, "Import jobs unscheduled");
    }
}
