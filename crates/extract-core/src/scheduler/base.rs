use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// How often a scheduler re-evaluates its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingStep {
    seconds: u64,
}

impl SchedulingStep {
    /// Create a step, which must be at least one second
    pub fn from_secs(seconds: u64) -> Result<Self> {
        if seconds == 0 {
            return Err(Error::invalid_config(
                "orchestrator.frequency_secs",
                "the scheduling step must be at least one second",
            ));
        }

        Ok(Self { seconds })
    }

    /// Step in seconds
    pub fn as_secs(&self) -> u64 {
        self.seconds
    }

    /// Step in milliseconds
    pub fn as_millis(&self) -> u64 {
        self.seconds.saturating_mul(1000)
    }

    /// Step as a delay
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

/// Lifecycle shared by every scheduler
///
/// Both operations may be called repeatedly; scheduling an already
/// scheduled job is a no-op.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Establish every recurring job this scheduler owns
    async fn schedule_jobs(&self) -> Result<()>;

    /// Cancel the jobs and release the resources they use
    async fn unschedule_jobs(&self);
}
