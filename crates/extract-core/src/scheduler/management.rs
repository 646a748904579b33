use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::base::JobScheduler;
use super::registrar::{job_fn, ScheduledTask, TaskRegistrar};
use super::triggers::DirectorySyncTrigger;
use crate::error::Result;
use crate::repositories::ParametersRepository;
use crate::runners::{DirectorySyncRunner, DirectorySynchronizer};
use crate::settings::DirectorySyncSettings;

/// Scheduler of the maintenance jobs
///
/// Owns a single job, the directory synchronisation, driven by a trigger
/// computed from the stored settings rather than by a fixed delay.
pub struct ManagementTasksScheduler {
    registrar: Arc<TaskRegistrar>,
    parameters: Arc<dyn ParametersRepository>,
    synchronizer: Option<Arc<dyn DirectorySynchronizer>>,
    task: Mutex<Option<ScheduledTask>>,
}

impl ManagementTasksScheduler {
    /// Create a scheduler; without a synchroniser it never schedules anything
    pub fn new(
        registrar: Arc<TaskRegistrar>,
        parameters: Arc<dyn ParametersRepository>,
        synchronizer: Option<Arc<dyn DirectorySynchronizer>>,
    ) -> Self {
        Self {
            registrar,
            parameters,
            synchronizer,
            task: Mutex::new(None),
        }
    }

    /// Whether the synchronisation job is scheduled
    pub async fn is_scheduled(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_cancelled() && !task.is_finished())
    }
}

#[async_trait]
impl JobScheduler for ManagementTasksScheduler {
    async fn schedule_jobs(&self) -> Result<()> {
        let Some(synchronizer) = self.synchronizer.clone() else {
            debug!("No directory synchroniser, nothing to schedule");
            return Ok(());
        };

        let settings = DirectorySyncSettings::load(self.parameters.as_ref()).await?;
        if !settings.is_synchronization_enabled() {
            info!("Directory synchronisation is disabled");
            return Ok(());
        }

        let mut task = self.task.lock().await;
        if task
            .as_ref()
            .is_some_and(|task| !task.is_cancelled() && !task.is_finished())
        {
            debug!("Directory synchronisation already scheduled");
            return Ok(());
        }

        let runner = Arc::new(DirectorySyncRunner::new(synchronizer, self.parameters.clone()));
        let trigger = Arc::new(DirectorySyncTrigger::new(self.parameters.clone()));

        *task = Some(self.registrar.schedule_with_trigger(
            "directory-sync",
            trigger,
            job_fn(move || {
                let runner = runner.clone();
                async move { runner.run().await }
            }),
        ));

        info!(
            frequency_hours = settings.synchronization_frequency_hours,
            "Directory synchronisation scheduled"
        );
        Ok(())
    }

    async fn unschedule_jobs(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.cancel(false);
            info!("Directory synchronisation unscheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::keys;
    use crate::test_support::{create_test_context, wait_until, CountingSynchronizer};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn registrar() -> Arc<TaskRegistrar> {
        Arc::new(TaskRegistrar::new(CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_disabled_synchronisation_is_not_scheduled() {
        let ctx = create_test_context().await;
        let synchronizer = Arc::new(CountingSynchronizer::new(false));
        let scheduler = ManagementTasksScheduler::new(
            registrar(),
            ctx.repositories.parameters.clone(),
            Some(synchronizer),
        );

        scheduler.schedule_jobs().await.unwrap();
        assert!(!scheduler.is_scheduled().await);
    }

    #[tokio::test]
    async fn test_without_synchronizer_nothing_is_scheduled() {
        let ctx = create_test_context().await;
        let parameters = ctx.repositories.parameters.clone();
        parameters.set(keys::LDAP_ENABLED, "true").await.unwrap();
        parameters.set(keys::LDAP_SYNCHRONIZATION_ENABLED, "true").await.unwrap();

        let scheduler = ManagementTasksScheduler::new(registrar(), parameters, None);

        scheduler.schedule_jobs().await.unwrap();
        assert!(!scheduler.is_scheduled().await);
    }

    #[tokio::test]
    async fn test_enabled_synchronisation_runs_once_per_period() {
        let ctx = create_test_context().await;
        let parameters = ctx.repositories.parameters.clone();
        parameters.set(keys::LDAP_ENABLED, "true").await.unwrap();
        parameters.set(keys::LDAP_SYNCHRONIZATION_ENABLED, "true").await.unwrap();
        parameters.set(keys::LDAP_SYNCHRONIZATION_FREQUENCY, "24").await.unwrap();

        let synchronizer = Arc::new(CountingSynchronizer::new(false));
        let scheduler = ManagementTasksScheduler::new(
            registrar(),
            parameters.clone(),
            Some(synchronizer.clone()),
        );

        scheduler.schedule_jobs().await.unwrap();
        scheduler.schedule_jobs().await.unwrap();
        assert!(scheduler.is_scheduled().await);

        let counter = &synchronizer;
        assert!(wait_until(Duration::from_secs(2), move || async move { counter.runs() == 1 }).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(synchronizer.runs(), 1);
        assert!(parameters.get(keys::LDAP_LAST_SYNCHRONIZATION).await.unwrap().is_some());

        scheduler.unschedule_jobs().await;
        assert!(!scheduler.is_scheduled().await);
    }
}
