use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use super::registrar::Trigger;
use crate::repositories::ParametersRepository;
use crate::settings::DirectorySyncSettings;

/// Computes the next directory synchronisation from the stored settings
///
/// The settings are read again before every run, so frequency changes and
/// deactivation take effect without rescheduling.
pub struct DirectorySyncTrigger {
    parameters: Arc<dyn ParametersRepository>,
}

impl DirectorySyncTrigger {
    /// Create a trigger reading the given parameters
    pub fn new(parameters: Arc<dyn ParametersRepository>) -> Self {
        Self { parameters }
    }
}

#[async_trait]
impl Trigger for DirectorySyncTrigger {
    async fn next_execution_time(
        &self,
        _last_completion: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match DirectorySyncSettings::load(self.parameters.as_ref()).await {
            Ok(settings) => {
                let next = settings.next_scheduled_synchronization(Utc::now());
                debug!(next = ?next, "Next directory synchronisation");
                next
            }
            Err(e) => {
                error!("Could not read the directory settings: {}", e);
                None
            }
        }
    }
}
