//! Extract Core - Orchestration Engine
//!
//! This crate provides the scheduling engine that drives the lifecycle of
//! geodata delivery orders ("requests"), including:
//! - Import: one recurring job per active connector, reconciled at runtime
//! - Matching: binding imported requests to a process through rules
//! - Execution: running process tasks with per-request admission control
//! - Export: delivering finished requests back through their connector
//! - Notification: standby reminders for operators
//! - Management: directory synchronisation on a computed trigger
//!
//! The host constructs an [`Orchestrator`] once, initializes it with its
//! collaborators and lets the schedulers manage themselves afterwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod error;
pub mod notifications;
pub mod orchestrator;
pub mod plugins;
pub mod repositories;
pub mod runners;
pub mod scheduler;
pub mod settings;
pub mod shutdown;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::{
    Connector, HistoryRecord, HistoryStatus, OrderRecord, Process, Request, RequestStatus, Rule,
    Task,
};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use notifications::{EmailMessage, EmailSettings, MessageCatalog, NotificationKind};
pub use orchestrator::{Orchestrator, OrchestratorComponents, OrchestratorComponentsBuilder};
pub use plugins::{
    ConnectorContext, ConnectorDiscovery, ConnectorPlugin, ExportResult, ImportResult,
    PluginDiscovery, PluginRegistry, TaskContext, TaskPlugin, TaskPluginDiscovery, TaskResult,
    TaskResultStatus,
};
pub use repositories::{
    ConnectorRepository, HistoryRepository, ParametersRepository, ProcessRepository,
    Repositories, RequestRepository, RuleRepository, UserRepository,
};
pub use runners::DirectorySynchronizer;
pub use scheduler::{
    ImportJobsScheduler, JobScheduler, JobSchedulingInfo, ManagementTasksScheduler,
    RequestsProcessingScheduler, RunningTaskRegistry, ScheduledTask, SchedulingStep,
    TaskRegistrar, Trigger, WorkerPool,
};
pub use settings::{
    DirectorySyncSettings, OrchestratorSettings, SchedulerMode, TimeRange, TimeRangeCollection,
    WorkingState,
};
pub use shutdown::{ShutdownController, ShutdownPhase};
pub use store::SqliteStore;
