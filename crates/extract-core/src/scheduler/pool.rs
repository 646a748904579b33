use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::debug;

/// Worker pool for task runners
///
/// Unbounded unless a limit is given; with a limit, submissions beyond it
/// wait for a permit instead of being dropped.
pub struct WorkerPool {
    permits: Option<Arc<Semaphore>>,
    workers: Arc<DashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Create a pool, optionally limited to `max_concurrent` running workers
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            permits: max_concurrent
                .filter(|max| *max > 0)
                .map(|max| Arc::new(Semaphore::new(max))),
            workers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `work` on the pool
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.retain(|_, handle| !handle.is_finished());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let permits = self.permits.clone();
        let workers = self.workers.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permits {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            work.await;
            workers.remove(&id);
        });

        if !handle.is_finished() {
            self.workers.insert(id, handle.abort_handle());
        }
    }

    /// Number of workers not finished yet
    pub fn active_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Abort every outstanding worker, returning how many were aborted
    pub fn shutdown_now(&self) -> usize {
        let mut aborted = 0;

        self.workers.retain(|id, handle| {
            if !handle.is_finished() {
                debug!(worker = id, "Aborting worker");
                handle.abort();
                aborted += 1;
            }
            false
        });

        aborted
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(None)
    }
}
