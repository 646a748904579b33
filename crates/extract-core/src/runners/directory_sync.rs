use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::repositories::ParametersRepository;
use crate::settings::DirectorySyncSettings;

/// Imports the users of an external directory
#[async_trait]
pub trait DirectorySynchronizer: Send + Sync {
    /// Synchronise the users, returning how many were updated
    async fn synchronize(&self) -> Result<usize>;
}

/// Runs a directory synchronisation and records its date
pub struct DirectorySyncRunner {
    synchronizer: Arc<dyn DirectorySynchronizer>,
    parameters: Arc<dyn ParametersRepository>,
    running: AtomicBool,
}

impl DirectorySyncRunner {
    /// Create a runner
    pub fn new(
        synchronizer: Arc<dyn DirectorySynchronizer>,
        parameters: Arc<dyn ParametersRepository>,
    ) -> Self {
        Self {
            synchronizer,
            parameters,
            running: AtomicBool::new(false),
        }
    }

    /// Synchronise unless disabled or already running
    pub async fn run(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("A directory synchronisation is already running");
            return;
        }

        let _running = RunningFlag(&self.running);
        self.synchronize_once().await;
    }

    async fn synchronize_once(&self) {
        match DirectorySyncSettings::load(self.parameters.as_ref()).await {
            Ok(settings) if settings.is_synchronization_enabled() => {}
            Ok(_) => {
                error!("Directory synchronisation triggered while disabled");
                return;
            }
            Err(e) => {
                error!("Could not read the directory settings: {}", e);
                return;
            }
        }

        match self.synchronizer.synchronize().await {
            Ok(count) => info!(count, "Directory synchronised"),
            Err(e) => error!("Directory synchronisation failed: {}", e),
        }

        if let Err(e) =
            DirectorySyncSettings::store_last_synchronization(self.parameters.as_ref(), Utc::now())
                .await
        {
            error!("Could not store the directory synchronisation date: {}", e);
        }
    }
}

/// Clears the running flag even when the synchroniser panics
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
