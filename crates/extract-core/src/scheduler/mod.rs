//! Recurring job schedulers
//!
//! The engine runs three schedulers side by side:
//!
//! - **Requests processing**: export, matching, task execution and
//!   standby reminders, each at the orchestrator frequency
//! - **Imports**: one job per active connector at the connector's own
//!   cadence, reconciled against the connector table on every step
//! - **Management**: directory synchronisation on a computed trigger
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   Orchestrator   │  Lifecycle and working hours
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   JobScheduler   │  Requests / Imports / Management
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  TaskRegistrar   │  Fixed-delay and triggered jobs
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Runners      │  One tick of work
//! └──────────────────┘
//! ```
//!
//! Every job is a child of the registrar's root cancellation token, so
//! cancelling the root stops every job of every scheduler.

mod base;
mod imports;
mod job_info;
mod management;
mod pool;
mod registrar;
mod registry;
mod requests;
mod triggers;

pub use base::{JobScheduler, SchedulingStep};
pub use imports::ImportJobsScheduler;
pub use job_info::JobSchedulingInfo;
pub use management::ManagementTasksScheduler;
pub use pool::WorkerPool;
pub use registrar::{job_fn, JobFn, JobFuture, ScheduledTask, TaskRegistrar, Trigger};
pub use registry::RunningTaskRegistry;
pub use requests::RequestsProcessingScheduler;
pub use triggers::DirectorySyncTrigger;
