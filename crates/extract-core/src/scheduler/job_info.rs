use std::time::Duration;
use tracing::warn;

use super::registrar::ScheduledTask;
use crate::error::{Error, Result};

/// Delays below this are accepted but reported
const MINIMUM_DELAY_WARNING_THRESHOLD_MS: u64 = 1000;

/// Bookkeeping for one dynamically scheduled recurring job
///
/// Binds the id of the entity the job works for to the job handle and the
/// delay it was scheduled with, so that a cadence change can be detected.
#[derive(Debug)]
pub struct JobSchedulingInfo {
    job_id: i64,
    delay_ms: u64,
    task: ScheduledTask,
}

impl JobSchedulingInfo {
    /// Validate the id and delay, then start the job with `start`
    ///
    /// `start` is only called once validation passed.
    pub fn schedule<F>(job_id: i64, delay_ms: i64, start: F) -> Result<Self>
    where
        F: FnOnce(Duration) -> ScheduledTask,
    {
        if job_id < 1 {
            return Err(Error::InvalidJob(format!(
                "the job identifier must be greater than 0 (got {})",
                job_id
            )));
        }

        if delay_ms < 1 {
            return Err(Error::InvalidJob(format!(
                "the delay of job {} must be at least 1 ms (got {})",
                job_id, delay_ms
            )));
        }

        let delay_ms = delay_ms as u64;

        if delay_ms < MINIMUM_DELAY_WARNING_THRESHOLD_MS {
            warn!(
                job_id,
                delay_ms, "The job delay is under one second, this may overload the server"
            );
        }

        let task = start(Duration::from_millis(delay_ms));

        Ok(Self {
            job_id,
            delay_ms,
            task,
        })
    }

    /// Entity id
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Delay between runs in milliseconds
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Whether the job must be rescheduled for a new delay
    pub fn has_delay_changed(&self, delay_ms: i64) -> bool {
        delay_ms < 0 || self.delay_ms != delay_ms as u64
    }

    /// Job handle
    pub fn task(&self) -> &ScheduledTask {
        &self.task
    }

    /// Cancel the job
    pub fn cancel_job(&self, interrupt: bool) {
        self.task.cancel(interrupt);
    }
}
