//! Orchestrator facade
//!
//! The host builds one [`Orchestrator`] value, initializes it once with an
//! [`OrchestratorComponents`] bundle and keeps it for the life of the
//! process. A second initialization is rejected.
//!
//! # Example
//!
//! ```ignore
//! let controller = ShutdownController::new();
//! let components = OrchestratorComponents::builder()
//!     .registrar(Arc::new(TaskRegistrar::new(controller.token())))
//!     .language("en")
//!     .repositories(Repositories::from_store(store))
//!     .connector_plugins(connectors)
//!     .task_plugins(tasks)
//!     .email_settings(mailer)
//!     .settings(OrchestratorSettings::default())
//!     .build()?;
//!
//! let orchestrator = Orchestrator::new();
//! orchestrator.initialize(components).await?;
//! ```

use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::notifications::EmailSettings;
use crate::plugins::{ConnectorDiscovery, TaskPluginDiscovery};
use crate::repositories::Repositories;
use crate::runners::{DirectorySynchronizer, RunnerContext};
use crate::scheduler::{
    job_fn, ImportJobsScheduler, JobScheduler, ManagementTasksScheduler,
    RequestsProcessingScheduler, ScheduledTask, SchedulingStep, TaskRegistrar,
};
use crate::settings::{OrchestratorSettings, SchedulerMode, WorkingState};

#[cfg(test)]
mod tests;

/// Collaborators handed to [`Orchestrator::initialize`]
#[derive(Clone)]
pub struct OrchestratorComponents {
    /// Recurring-task facility
    pub registrar: Arc<TaskRegistrar>,
    /// Application language
    pub language: String,
    /// Data access
    pub repositories: Repositories,
    /// Connector plugin lookup
    pub connector_plugins: ConnectorDiscovery,
    /// Task plugin lookup
    pub task_plugins: TaskPluginDiscovery,
    /// Notification settings and transport
    pub email_settings: Arc<dyn EmailSettings>,
    /// Directory synchronisation, if the host supports it
    pub directory_synchronizer: Option<Arc<dyn DirectorySynchronizer>>,
    /// Frequency and working hours
    pub settings: OrchestratorSettings,
    /// Upper bound on concurrently running tasks (unbounded if `None`)
    pub max_concurrent_tasks: Option<usize>,
}

impl OrchestratorComponents {
    /// Start building a component bundle
    pub fn builder() -> OrchestratorComponentsBuilder {
        OrchestratorComponentsBuilder::new()
    }
}

/// Builder for [`OrchestratorComponents`]
#[derive(Default)]
pub struct OrchestratorComponentsBuilder {
    registrar: Option<Arc<TaskRegistrar>>,
    language: Option<String>,
    repositories: Option<Repositories>,
    connector_plugins: Option<ConnectorDiscovery>,
    task_plugins: Option<TaskPluginDiscovery>,
    email_settings: Option<Arc<dyn EmailSettings>>,
    directory_synchronizer: Option<Arc<dyn DirectorySynchronizer>>,
    settings: Option<OrchestratorSettings>,
    max_concurrent_tasks: Option<usize>,
}

impl OrchestratorComponentsBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recurring-task facility
    pub fn registrar(mut self, registrar: Arc<TaskRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// Set the application language
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the repositories
    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Set the connector plugin lookup
    pub fn connector_plugins(mut self, plugins: ConnectorDiscovery) -> Self {
        self.connector_plugins = Some(plugins);
        self
    }

    /// Set the task plugin lookup
    pub fn task_plugins(mut self, plugins: TaskPluginDiscovery) -> Self {
        self.task_plugins = Some(plugins);
        self
    }

    /// Set the notification settings
    pub fn email_settings(mut self, email_settings: Arc<dyn EmailSettings>) -> Self {
        self.email_settings = Some(email_settings);
        self
    }

    /// Set the directory synchroniser
    pub fn directory_synchronizer(mut self, synchronizer: Arc<dyn DirectorySynchronizer>) -> Self {
        self.directory_synchronizer = Some(synchronizer);
        self
    }

    /// Set the orchestrator settings
    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Bound the number of concurrently running tasks
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max);
        self
    }

    /// Build the bundle
    ///
    /// The synchroniser is optional and the settings default to
    /// [`OrchestratorSettings::default`]; everything else is required.
    pub fn build(self) -> Result<OrchestratorComponents> {
        let missing = |field: &str| Error::invalid_config(field, format!("{} is required", field));

        let language = self
            .language
            .filter(|language| !language.trim().is_empty())
            .ok_or_else(|| missing("language"))?;

        Ok(OrchestratorComponents {
            registrar: self.registrar.ok_or_else(|| missing("registrar"))?,
            language,
            repositories: self.repositories.ok_or_else(|| missing("repositories"))?,
            connector_plugins: self
                .connector_plugins
                .ok_or_else(|| missing("connector_plugins"))?,
            task_plugins: self.task_plugins.ok_or_else(|| missing("task_plugins"))?,
            email_settings: self.email_settings.ok_or_else(|| missing("email_settings"))?,
            directory_synchronizer: self.directory_synchronizer,
            settings: self.settings.unwrap_or_default(),
            max_concurrent_tasks: self.max_concurrent_tasks,
        })
    }
}

struct Schedulers {
    requests: Arc<RequestsProcessingScheduler>,
    imports: Arc<ImportJobsScheduler>,
    management: Arc<ManagementTasksScheduler>,
}

struct EngineState {
    settings: OrchestratorSettings,
    schedulers: Schedulers,
    monitoring: bool,
    time_range_task: Option<ScheduledTask>,
}

struct Engine {
    components: OrchestratorComponents,
    state: Mutex<EngineState>,
}

impl Engine {
    fn build_schedulers(components: &OrchestratorComponents, settings: &OrchestratorSettings) -> Result<Schedulers> {
        let step = SchedulingStep::from_secs(settings.frequency_secs)?;
        let runner_context = RunnerContext::new(
            components.language.clone(),
            components.repositories.clone(),
            components.email_settings.clone(),
        );

        Ok(Schedulers {
            requests: Arc::new(RequestsProcessingScheduler::new(
                components.registrar.clone(),
                step,
                runner_context.clone(),
                components.task_plugins.clone(),
                components.connector_plugins.clone(),
                components.max_concurrent_tasks,
            )),
            imports: Arc::new(ImportJobsScheduler::new(
                components.registrar.clone(),
                step,
                runner_context,
                components.connector_plugins.clone(),
            )),
            management: Arc::new(ManagementTasksScheduler::new(
                components.registrar.clone(),
                components.repositories.parameters.clone(),
                components.directory_synchronizer.clone(),
            )),
        })
    }

    /// Export, matching, task execution and reminders first, then imports and management
    async fn schedule_monitoring(state: &mut EngineState) -> Result<()> {
        if state.monitoring {
            debug!("Monitoring already scheduled");
            return Ok(());
        }

        state.schedulers.requests.schedule_jobs().await?;
        state.schedulers.imports.schedule_jobs().await?;
        state.schedulers.management.schedule_jobs().await?;

        state.monitoring = true;
        info!("Monitoring scheduled");
        Ok(())
    }

    async fn unschedule_monitoring(state: &mut EngineState, include_time_range: bool) {
        if include_time_range {
            if let Some(task) = state.time_range_task.take() {
                task.cancel(false);
                debug!("Time range monitor cancelled");
            }
        }

        if !state.monitoring {
            return;
        }

        state.schedulers.requests.unschedule_jobs().await;
        state.schedulers.imports.unschedule_jobs().await;
        state.schedulers.management.unschedule_jobs().await;

        state.monitoring = false;
        info!("Monitoring unscheduled");
    }

    async fn schedule_by_working_state(self: &Arc<Self>, state: &mut EngineState) -> Result<()> {
        match state.settings.mode {
            SchedulerMode::Off => {
                info!("The orchestrator is switched off, no job is scheduled");
                Ok(())
            }
            SchedulerMode::On => Self::schedule_monitoring(state).await,
            SchedulerMode::Ranges => {
                if state
                    .time_range_task
                    .as_ref()
                    .is_some_and(|task| !task.is_cancelled())
                {
                    return Ok(());
                }

                let engine: Weak<Self> = Arc::downgrade(self);
                let step = SchedulingStep::from_secs(state.settings.frequency_secs)?;
                let task = self.components.registrar.schedule_with_fixed_delay(
                    "time-range-monitor",
                    step.as_duration(),
                    job_fn(move || {
                        let engine = engine.clone();
                        async move {
                            if let Some(engine) = engine.upgrade() {
                                engine.manage_monitoring_by_time_range().await;
                            }
                        }
                    }),
                );

                state.time_range_task = Some(task);
                info!(ranges = state.settings.ranges.len(), "Monitoring follows the working hours");
                Ok(())
            }
        }
    }

    async fn manage_monitoring_by_time_range(&self) {
        let mut state = self.state.lock().await;

        if state.settings.is_working() {
            if !state.monitoring {
                info!("Entering the working hours");
                if let Err(e) = Self::schedule_monitoring(&mut state).await {
                    error!("Could not schedule the monitoring: {}", e);
                }
            }
        } else if state.monitoring {
            info!("Leaving the working hours");
            Self::unschedule_monitoring(&mut state, false).await;
        }
    }
}

/// Facade of the orchestration engine
#[derive(Default)]
pub struct Orchestrator {
    engine: OnceLock<Arc<Engine>>,
}

impl Orchestrator {
    /// Create an uninitialized orchestrator
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&self) -> Result<&Arc<Engine>> {
        self.engine.get().ok_or(Error::NotInitialized)
    }

    /// Whether [`Self::initialize`] succeeded
    pub fn is_initialized(&self) -> bool {
        self.engine.get().is_some()
    }

    /// Wire the schedulers and start them according to the working state
    pub async fn initialize(&self, components: OrchestratorComponents) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }

        components.settings.validate()?;

        let settings = components.settings.clone();
        let schedulers = Engine::build_schedulers(&components, &settings)?;
        let engine = Arc::new(Engine {
            components,
            state: Mutex::new(EngineState {
                settings,
                schedulers,
                monitoring: false,
                time_range_task: None,
            }),
        });

        self.engine
            .set(engine.clone())
            .map_err(|_| Error::AlreadyInitialized)?;

        info!(language = %engine.components.language, "Orchestrator initialized");

        let mut state = engine.state.lock().await;
        engine.schedule_by_working_state(&mut state).await?;
        Ok(())
    }

    /// Schedule every job now, regardless of the working hours
    pub async fn schedule_monitoring(&self) -> Result<()> {
        let engine = self.engine()?;
        let mut state = engine.state.lock().await;
        Engine::schedule_monitoring(&mut state).await?;
        Ok(())
    }

    /// Cancel every job, and the working-hours monitor if asked
    pub async fn unschedule_monitoring(&self, include_time_range: bool) -> Result<()> {
        let engine = self.engine()?;
        let mut state = engine.state.lock().await;
        Engine::unschedule_monitoring(&mut state, include_time_range).await;
        Ok(())
    }

    /// Cancel everything and schedule again according to the working state
    pub async fn reschedule_monitoring(&self) -> Result<()> {
        let engine = self.engine()?;
        let mut state = engine.state.lock().await;
        Engine::unschedule_monitoring(&mut state, true).await;
        engine.schedule_by_working_state(&mut state).await?;
        Ok(())
    }

    /// Apply the working-hours policy (ON, OFF or RANGES)
    pub async fn schedule_monitoring_by_working_state(&self) -> Result<()> {
        let engine = self.engine()?;
        let mut state = engine.state.lock().await;
        engine.schedule_by_working_state(&mut state).await?;
        Ok(())
    }

    /// Replace the settings; with `reschedule`, apply them immediately
    ///
    /// Invalid settings are rejected; identical settings are ignored.
    pub async fn update_settings(&self, settings: OrchestratorSettings, reschedule: bool) -> Result<()> {
        let engine = self.engine()?;

        if let Err(e) = settings.validate() {
            warn!("The new orchestrator settings are invalid: {}", e);
            return Err(e);
        }

        let mut state = engine.state.lock().await;

        if state.settings == settings {
            debug!("Orchestrator settings unchanged");
            return Ok(());
        }

        let frequency_changed = state.settings.frequency_secs != settings.frequency_secs;
        info!(
            frequency_secs = settings.frequency_secs,
            mode = %settings.mode,
            "Orchestrator settings updated"
        );
        state.settings = settings;

        if !reschedule {
            return Ok(());
        }

        Engine::unschedule_monitoring(&mut state, true).await;

        if frequency_changed {
            state.schedulers = Engine::build_schedulers(&engine.components, &state.settings)?;
        }

        engine.schedule_by_working_state(&mut state).await?;
        Ok(())
    }

    /// Reload the settings from the system parameters and apply them
    pub async fn update_settings_from_parameters(&self) -> Result<()> {
        let engine = self.engine()?;
        let settings =
            OrchestratorSettings::from_parameters(engine.components.repositories.parameters.as_ref())
                .await?;

        self.update_settings(settings, true).await
    }

    /// Current settings
    pub async fn settings(&self) -> Result<OrchestratorSettings> {
        let engine = self.engine()?;
        let state = engine.state.lock().await;
        Ok(state.settings.clone())
    }

    /// Working state derived from the settings and the current time
    pub async fn working_state(&self) -> Result<WorkingState> {
        let engine = self.engine()?;
        let state = engine.state.lock().await;
        Ok(state.settings.state())
    }

    /// Whether the jobs are currently scheduled
    pub async fn is_monitoring(&self) -> bool {
        match self.engine.get() {
            Some(engine) => engine.state.lock().await.monitoring,
            None => false,
        }
    }

    /// Request processing scheduler
    pub async fn requests_scheduler(&self) -> Result<Arc<RequestsProcessingScheduler>> {
        let engine = self.engine()?;
        let state = engine.state.lock().await;
        Ok(state.schedulers.requests.clone())
    }

    /// Import scheduler
    pub async fn import_scheduler(&self) -> Result<Arc<ImportJobsScheduler>> {
        let engine = self.engine()?;
        let state = engine.state.lock().await;
        Ok(state.schedulers.imports.clone())
    }

    /// Stop every job; the orchestrator stays initialized
    pub async fn shutdown(&self) {
        let Some(engine) = self.engine.get() else {
            return;
        };

        info!("Orchestrator shutting down");
        let mut state = engine.state.lock().await;
        Engine::unschedule_monitoring(&mut state, true).await;
    }
}
