//! Job bodies
//!
//! Each runner performs one tick of a recurring job. Runners catch and log
//! their own failures per item, so one broken request or connector never
//! prevents the others from being processed.

mod directory_sync;
mod export;
mod import;
mod matching;
mod notification;
pub mod rules;
mod task;


use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::HistoryRecord;
use crate::notifications::EmailSettings;
use crate::repositories::Repositories;

pub use directory_sync::{DirectorySyncRunner, DirectorySynchronizer};
pub use export::ExportRequestsRunner;
pub use import::ConnectorImportRunner;
pub use matching::RequestMatchingRunner;
pub use notification::StandbyReminderRunner;
pub use task::RequestTaskRunner;

/// Collaborators shared by the runners
#[derive(Clone)]
pub struct RunnerContext {
    /// Application language
    pub language: String,
    /// Data access
    pub repositories: Repositories,
    /// Notification settings and transport
    pub email_settings: Arc<dyn EmailSettings>,
}

impl RunnerContext {
    /// Create a context
    pub fn new(
        language: impl Into<String>,
        repositories: Repositories,
        email_settings: Arc<dyn EmailSettings>,
    ) -> Self {
        Self {
            language: language.into(),
            repositories,
            email_settings,
        }
    }

    /// Localized message
    pub(crate) fn message(&self, key: &str) -> String {
        self.email_settings.message_string(key)
    }

    /// Operators of a process; lookup failures yield no recipient
    pub(crate) async fn operator_addresses(&self, process_id: Option<i64>) -> Vec<String> {
        let Some(process_id) = process_id else {
            return Vec::new();
        };

        match self
            .repositories
            .processes
            .find_operator_addresses(process_id)
            .await
        {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(process_id, "Could not read the operators of the process: {}", e);
                Vec::new()
            }
        }
    }

    /// Active administrators; lookup failures yield no recipient
    pub(crate) async fn administrator_addresses(&self) -> Vec<String> {
        match self.repositories.users.find_administrator_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("Could not read the administrators: {}", e);
                Vec::new()
            }
        }
    }
}

/// Step number for the next history record, given the history sorted by step descending
pub(crate) fn next_step(history: &[HistoryRecord]) -> i32 {
    history.first().map(|record| record.step + 1).unwrap_or(1)
}

/// Receives the id of a request whose task runner finished
pub trait TaskCompletionListener: Send + Sync {
    /// Called exactly once per dispatched task runner
    fn notify_task_completion(&self, request_id: i64);
}

/// Notifies the listener when dropped
///
/// Held for the whole life of a task runner, so completion is reported
/// whether the runner returns, panics or is aborted.
pub(crate) struct CompletionGuard {
    request_id: i64,
    listener: Option<Arc<dyn TaskCompletionListener>>,
}

impl CompletionGuard {
    pub(crate) fn new(request_id: i64, listener: Arc<dyn TaskCompletionListener>) -> Self {
        Self {
            request_id,
            listener: Some(listener),
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            debug!(request_id = self.request_id, "Task runner completed");
            listener.notify_task_completion(self.request_id);
        }
    }
}
