//! Recurring task facility
//!
//! Every recurring job is a spawned loop owning a child of the registrar's
//! cancellation token. Cancelling one job never affects its siblings;
//! cancelling the root token (process shutdown) stops all of them.
//!
//! Job bodies are run behind `catch_unwind`, so a panicking tick is logged
//! and the job stays scheduled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Future returned by a job body
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback producing one run of a recurring job
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure into a [`JobFn`]
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

/// Shortest wait between two trigger-driven runs
const MIN_TRIGGER_INTERVAL: Duration = Duration::from_secs(1);

/// Computes when a trigger-driven job runs next
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Next execution time given the last completion, `None` to stop the job
    async fn next_execution_time(
        &self,
        last_completion: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>>;
}

/// Handle on a scheduled recurring job
#[derive(Debug)]
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the job
    ///
    /// Without `interrupt` a run in progress completes before the loop exits.
    pub fn cancel(&self, interrupt: bool) {
        self.token.cancel();

        if interrupt {
            self.handle.abort();
        }
    }

    /// Whether the job was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the job loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Token observed by the job loop
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Schedules recurring jobs on the tokio runtime
pub struct TaskRegistrar {
    root: CancellationToken,
}

impl TaskRegistrar {
    /// Create a registrar whose jobs stop when `root` is cancelled
    pub fn new(root: CancellationToken) -> Self {
        Self { root }
    }

    /// Whether the root token was cancelled
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Run `job` now, then again `delay` after each run completes
    pub fn schedule_with_fixed_delay(
        &self,
        name: impl Into<String>,
        delay: Duration,
        job: JobFn,
    ) -> ScheduledTask {
        let name = name.into();
        let token = self.root.child_token();
        let loop_token = token.clone();
        let loop_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!(job = %loop_name, delay_ms = delay.as_millis() as u64, "Recurring job started");

            while !loop_token.is_cancelled() {
                run_guarded(&loop_name, &job).await;

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = loop_token.cancelled() => break,
                }
            }

            debug!(job = %loop_name, "Recurring job stopped");
        });

        ScheduledTask {
            name,
            token,
            handle,
        }
    }

    /// Run `job` whenever `trigger` says so
    pub fn schedule_with_trigger(
        &self,
        name: impl Into<String>,
        trigger: Arc<dyn Trigger>,
        job: JobFn,
    ) -> ScheduledTask {
        let name = name.into();
        let token = self.root.child_token();
        let loop_token = token.clone();
        let loop_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!(job = %loop_name, "Triggered job started");
            let mut last_completion: Option<DateTime<Utc>> = None;

            while !loop_token.is_cancelled() {
                let Some(next) = trigger.next_execution_time(last_completion).await else {
                    info!(job = %loop_name, "No next execution time, job stops");
                    break;
                };

                let mut wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if last_completion.is_some() {
                    wait = wait.max(MIN_TRIGGER_INTERVAL);
                }

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = loop_token.cancelled() => break,
                }

                run_guarded(&loop_name, &job).await;
                last_completion = Some(Utc::now());
            }

            debug!(job = %loop_name, "Triggered job stopped");
        });

        ScheduledTask {
            name,
            token,
            handle,
        }
    }
}

async fn run_guarded(name: &str, job: &JobFn) {
    if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
        error!(job = %name, "Recurring job panicked; it stays scheduled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
        job_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    struct NeverTrigger;

    #[async_trait]
    impl Trigger for NeverTrigger {
        async fn next_execution_time(&self, _: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
            None
        }
    }

    struct OnceTrigger;

    #[async_trait]
    impl Trigger for OnceTrigger {
        async fn next_execution_time(
            &self,
            last_completion: Option<DateTime<Utc>>,
        ) -> Option<DateTime<Utc>> {
            match last_completion {
                None => Some(Utc::now()),
                Some(_) => None,
            }
        }
    }

    #[tokio::test]
    async fn test_fixed_delay_runs_immediately_and_repeats() {
        let registrar = TaskRegistrar::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let task = registrar.schedule_with_fixed_delay(
            "counter",
            Duration::from_millis(20),
            counting_job(counter.clone()),
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);

        task.cancel(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stopped_at = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(task.is_cancelled());
        assert!(task.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_panicking_job_stays_scheduled() {
        let registrar = TaskRegistrar::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = counter.clone();

        let job = job_fn(move || {
            let counter = job_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("tick failed");
            }
        });

        let task = registrar.schedule_with_fixed_delay("panicky", Duration::from_millis(10), job);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert!(!task.is_finished());
        task.cancel(true);
    }

    #[tokio::test]
    async fn test_cancelling_one_job_keeps_siblings() {
        let registrar = TaskRegistrar::new(CancellationToken::new());
        let first = registrar.schedule_with_fixed_delay(
            "first",
            Duration::from_millis(10),
            counting_job(Arc::new(AtomicUsize::new(0))),
        );
        let second = registrar.schedule_with_fixed_delay(
            "second",
            Duration::from_millis(10),
            counting_job(Arc::new(AtomicUsize::new(0))),
        );

        first.cancel(false);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        second.cancel(false);
    }

    #[tokio::test]
    async fn test_root_cancellation_stops_all_jobs() {
        let root = CancellationToken::new();
        let registrar = TaskRegistrar::new(root.clone());
        let task = registrar.schedule_with_fixed_delay(
            "job",
            Duration::from_millis(10),
            counting_job(Arc::new(AtomicUsize::new(0))),
        );

        root.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(registrar.is_shut_down());
        assert!(task.is_cancelled());
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_trigger_without_next_time_stops() {
        let registrar = TaskRegistrar::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let task = registrar.schedule_with_trigger(
            "never",
            Arc::new(NeverTrigger),
            counting_job(counter.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(task.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trigger_runs_when_due() {
        let registrar = TaskRegistrar::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let task = registrar.schedule_with_trigger(
            "once",
            Arc::new(OnceTrigger),
            counting_job(counter.clone()),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }
}
