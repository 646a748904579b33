//! Plugin contracts
//!
//! Connector plugins import orders from a remote server and deliver results
//! back to it. Task plugins run one step of a process. Both are looked up by
//! code through a [`PluginDiscovery`] service supplied by the host.
//!
//! Plugin calls go through the `*_guarded` helpers, which turn a panicking
//! plugin into a failed result so that it can never take a scheduler down.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

use crate::domain::{OrderRecord, Request};
use crate::notifications::EmailSettings;

/// Context a connector plugin is invoked with
#[derive(Debug, Clone, Default)]
pub struct ConnectorContext {
    /// Application language
    pub language: String,
    /// Parameter values of the connector
    pub parameters: HashMap<String, String>,
}

/// Outcome of an order import
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Whether the import succeeded
    pub success: bool,
    /// Failure reason
    pub error_message: Option<String>,
    /// Imported orders
    pub orders: Vec<OrderRecord>,
}

impl ImportResult {
    /// Successful import
    pub fn success(orders: Vec<OrderRecord>) -> Self {
        Self {
            success: true,
            error_message: None,
            orders,
        }
    }

    /// Failed import
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            orders: Vec::new(),
        }
    }
}

/// Outcome of a result delivery
#[derive(Debug, Clone, Default)]
pub struct ExportResult {
    /// Whether the delivery succeeded
    pub success: bool,
    /// Result message
    pub message: Option<String>,
    /// Failure details
    pub details: Option<String>,
}

impl ExportResult {
    /// Successful delivery
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            details: None,
        }
    }

    /// Failed delivery
    pub fn failure(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            details: Some(details.into()),
        }
    }
}

/// A plugin serving one kind of connector
#[async_trait]
pub trait ConnectorPlugin: Send + Sync {
    /// Plugin code, matched against [`crate::Connector::code`]
    fn code(&self) -> &str;

    /// Fetch new orders from the remote server
    async fn retrieve_orders(&self, context: &ConnectorContext) -> ImportResult;

    /// Deliver the result of a finished request
    async fn export_result(&self, context: &ConnectorContext, request: &Request) -> ExportResult;
}

/// Task result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    /// Task done, continue with the next one
    Success,
    /// Task failed
    Error,
    /// Task needs an operator decision
    Standby,
    /// Task could not run now; retry on the next tick
    NotRun,
}

/// Outcome of a task
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Result status
    pub status: TaskResultStatus,
    /// Result message
    pub message: String,
    /// Plugin-specific error code
    pub error_code: String,
    /// Request as modified by the plugin (remark and rejection are applied)
    pub updated_request: Option<Request>,
}

impl TaskResult {
    /// Successful result
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Success,
            message: message.into(),
            error_code: String::new(),
            updated_request: None,
        }
    }

    /// Failed result
    pub fn error(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Error,
            message: message.into(),
            error_code: error_code.into(),
            updated_request: None,
        }
    }

    /// Standby result
    pub fn standby(message: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Standby,
            message: message.into(),
            error_code: String::new(),
            updated_request: None,
        }
    }

    /// Not-run result
    pub fn not_run() -> Self {
        Self {
            status: TaskResultStatus::NotRun,
            message: String::new(),
            error_code: String::new(),
            updated_request: None,
        }
    }

    /// Attach the modified request
    pub fn with_request(mut self, request: Request) -> Self {
        self.updated_request = Some(request);
        self
    }

    /// Message written to the history record of a failed task
    pub fn error_message(&self) -> String {
        if self.error_code.trim().is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, self.error_code)
        }
    }
}

/// Context a task plugin is invoked with
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Application language
    pub language: String,
    /// Label of the task being run
    pub task_label: String,
    /// Parameter values of the task
    pub parameters: HashMap<String, String>,
}

/// A plugin running one kind of process task
#[async_trait]
pub trait TaskPlugin: Send + Sync {
    /// Plugin code, matched against [`crate::Task::code`]
    fn code(&self) -> &str;

    /// Run the task on a request
    async fn execute(
        &self,
        request: &Request,
        context: &TaskContext,
        email_settings: &dyn EmailSettings,
    ) -> TaskResult;
}

/// Plugin lookup by code
pub trait PluginDiscovery<P: ?Sized>: Send + Sync {
    /// Find the plugin for a code
    fn lookup(&self, code: &str) -> Option<Arc<P>>;
}

/// Connector plugin discovery handle
pub type ConnectorDiscovery = Arc<dyn PluginDiscovery<dyn ConnectorPlugin>>;

/// Task plugin discovery handle
pub type TaskPluginDiscovery = Arc<dyn PluginDiscovery<dyn TaskPlugin>>;

/// In-memory plugin registry
pub struct PluginRegistry<P: ?Sized> {
    plugins: DashMap<String, Arc<P>>,
}

impl<P: ?Sized> PluginRegistry<P> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            plugins: DashMap::new(),
        }
    }

    /// Register a plugin under a code, replacing any previous one
    pub fn register(&self, code: impl Into<String>, plugin: Arc<P>) {
        self.plugins.insert(code.into(), plugin);
    }

    /// Remove a plugin
    pub fn unregister(&self, code: &str) -> bool {
        self.plugins.remove(code).is_some()
    }

    /// Registered codes
    pub fn codes(&self) -> Vec<String> {
        self.plugins.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl<P: ?Sized> Default for PluginRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized + Send + Sync> PluginDiscovery<P> for PluginRegistry<P> {
    fn lookup(&self, code: &str) -> Option<Arc<P>> {
        self.plugins.get(code).map(|entry| entry.value().clone())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(Null)".to_string()
    }
}

/// Run a task plugin, converting a panic into an ERROR result
pub(crate) async fn execute_task_guarded(
    plugin: &dyn TaskPlugin,
    request: &Request,
    context: &TaskContext,
    email_settings: &dyn EmailSettings,
) -> TaskResult {
    match AssertUnwindSafe(plugin.execute(request, context, email_settings))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!(plugin = plugin.code(), request_id = request.id, "Task plugin panicked: {}", message);
            TaskResult::error(message, "")
        }
    }
}

/// Retrieve orders, converting a panic into a failed import
pub(crate) async fn retrieve_orders_guarded(
    plugin: &dyn ConnectorPlugin,
    context: &ConnectorContext,
) -> ImportResult {
    match AssertUnwindSafe(plugin.retrieve_orders(context))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!(plugin = plugin.code(), "Connector plugin panicked while importing: {}", message);
            ImportResult::failure(message)
        }
    }
}

/// Deliver a result, converting a panic into a failed export
pub(crate) async fn export_result_guarded(
    plugin: &dyn ConnectorPlugin,
    context: &ConnectorContext,
    request: &Request,
) -> ExportResult {
    match AssertUnwindSafe(plugin.export_result(context, request))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!(plugin = plugin.code(), request_id = request.id, "Connector plugin panicked while exporting: {}", message);
            ExportResult::failure("Export failed", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_request, RecordingMailer, ScriptedTaskPlugin};

    #[test]
    fn test_registry_lookup() {
        let registry: PluginRegistry<dyn TaskPlugin> = PluginRegistry::new();
        assert!(registry.is_empty());

        registry.register("archive", Arc::new(ScriptedTaskPlugin::new("archive")));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("archive").is_some());
        assert!(registry.lookup("email").is_none());

        assert!(registry.unregister("archive"));
        assert!(registry.lookup("archive").is_none());
    }

    #[test]
    fn test_error_message_with_code() {
        assert_eq!(TaskResult::error("disk full", "").error_message(), "disk full");
        assert_eq!(
            TaskResult::error("disk full", "E42").error_message(),
            "disk full (E42)"
        );
    }

    #[tokio::test]
    async fn test_panicking_task_plugin_becomes_error() {
        let plugin = ScriptedTaskPlugin::new("boom").panicking("plugin exploded");
        let mailer = RecordingMailer::new();
        let request = sample_request();

        let result =
            execute_task_guarded(&plugin, &request, &TaskContext::default(), &mailer).await;

        assert_eq!(result.status, TaskResultStatus::Error);
        assert_eq!(result.message, "plugin exploded");
    }
}
