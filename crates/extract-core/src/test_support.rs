//! Shared fixtures for unit tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::domain::{Connector, HistoryRecord, OrderRecord, Process, Request, RequestStatus, Task};
use crate::error::{Error, Result};
use crate::notifications::{EmailMessage, EmailSettings, MessageCatalog, NotificationKind};
use crate::plugins::{
    ConnectorContext, ConnectorPlugin, ExportResult, ImportResult, PluginRegistry, TaskContext,
    TaskPlugin, TaskResult,
};
use crate::repositories::Repositories;
use crate::runners::RunnerContext;
use crate::store::SqliteStore;

pub(crate) struct TestContext {
    pub store: Arc<SqliteStore>,
    pub repositories: Repositories,
    pub mailer: Arc<RecordingMailer>,
    _dir: TempDir,
}

pub(crate) async fn create_test_context() -> TestContext {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test_extract.db");
    let store = Arc::new(SqliteStore::from_path(&path).await.unwrap());
    let repositories = Repositories::from_store(store.clone());

    TestContext {
        store,
        repositories,
        mailer: Arc::new(RecordingMailer::new()),
        _dir: dir,
    }
}

impl TestContext {
    pub fn runner_context(&self) -> RunnerContext {
        RunnerContext::new("en", self.repositories.clone(), self.mailer.clone())
    }

    pub async fn add_connector(&self, name: &str, code: &str, frequency_secs: i64) -> Connector {
        self.repositories
            .connectors
            .save(&Connector::new(name, code, frequency_secs))
            .await
            .unwrap()
    }

    pub async fn add_process(&self, name: &str, tasks: &[(&str, &str)]) -> (Process, Vec<Task>) {
        let process = self.store.create_process(name).await.unwrap();
        let mut created = Vec::new();

        for (index, (code, label)) in tasks.iter().enumerate() {
            let task = self
                .store
                .add_task(process.id, index as i32 + 1, code, label, HashMap::new())
                .await
                .unwrap();
            created.push(task);
        }

        (process, created)
    }

    pub async fn add_operator(&self, process_id: i64, email: &str) {
        let user_id = self.store.add_user(email, Some(email), false).await.unwrap();
        self.store.add_process_operator(process_id, user_id).await.unwrap();
    }

    pub async fn add_administrator(&self, email: &str) {
        self.store.add_user(email, Some(email), true).await.unwrap();
    }

    /// Save an ONGOING request bound to a process
    pub async fn add_ongoing_request(&self, connector_id: i64, process_id: i64) -> Request {
        let mut request = Request::from_order(connector_id, sample_order());
        request.process_id = Some(process_id);
        request.status = RequestStatus::Ongoing;
        self.repositories.requests.save(&request).await.unwrap()
    }

    pub async fn add_request(&self, request: Request) -> Request {
        self.repositories.requests.save(&request).await.unwrap()
    }

    pub async fn request(&self, id: i64) -> Request {
        self.repositories.requests.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn history(&self, request_id: i64) -> Vec<HistoryRecord> {
        self.repositories
            .history
            .find_by_request_order_by_step_desc(request_id)
            .await
            .unwrap()
    }
}

pub(crate) fn sample_order() -> OrderRecord {
    OrderRecord {
        order_label: "ORDER-2024-001".to_string(),
        order_guid: "b1a2c3d4".to_string(),
        product_guid: "a8405d50-f712-4e3e-96b2-a5452cf4e03e".to_string(),
        product_label: "Cadastral plan".to_string(),
        organism: "City of Lausanne".to_string(),
        client: "Jane Smith".to_string(),
        tiers: None,
        perimeter: Some("POLYGON((6.6 46.5,6.7 46.5,6.7 46.6,6.6 46.5))".to_string()),
        surface: Some(1250.5),
        parameters: serde_json::json!({ "FORMAT": "DXF", "PROJECTION": "EPSG:2056" }),
        external_url: Some("https://shop.example.com/orders/b1a2c3d4".to_string()),
    }
}

pub(crate) fn sample_request() -> Request {
    let mut request = Request::from_order(1, sample_order());
    request.id = 1;
    request
}

/// Poll `check` until it holds or `timeout` elapses
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Mailer keeping every message in memory
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    catalog: MessageCatalog,
    enabled: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            catalog: MessageCatalog::for_language("en"),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: NotificationKind) -> Vec<EmailMessage> {
        self.sent().into_iter().filter(|m| m.kind == kind).collect()
    }
}

#[async_trait]
impl EmailSettings for RecordingMailer {
    fn is_notification_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn message_string(&self, key: &str) -> String {
        self.catalog.get(key)
    }

    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Task plugin returning queued results, then successes
pub(crate) struct ScriptedTaskPlugin {
    code: String,
    results: Mutex<VecDeque<TaskResult>>,
    panic_message: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedTaskPlugin {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            results: Mutex::new(VecDeque::new()),
            panic_message: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_results(self, results: Vec<TaskResult>) -> Self {
        *self.results.lock().unwrap() = results.into();
        self
    }

    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_message = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskPlugin for ScriptedTaskPlugin {
    fn code(&self) -> &str {
        &self.code
    }

    async fn execute(
        &self,
        _request: &Request,
        _context: &TaskContext,
        _email_settings: &dyn EmailSettings,
    ) -> TaskResult {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.panic_message {
            panic!("{}", message);
        }

        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TaskResult::success("OK"))
    }
}

/// Connector plugin serving a fixed batch of orders once
pub(crate) struct StaticConnectorPlugin {
    code: String,
    orders: Mutex<Vec<OrderRecord>>,
    import_failure: Mutex<Option<String>>,
    export_result: Mutex<ExportResult>,
    imports: AtomicUsize,
    exported: Mutex<Vec<i64>>,
}

impl StaticConnectorPlugin {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            orders: Mutex::new(Vec::new()),
            import_failure: Mutex::new(None),
            export_result: Mutex::new(ExportResult::success()),
            imports: AtomicUsize::new(0),
            exported: Mutex::new(Vec::new()),
        }
    }

    pub fn with_orders(self, orders: Vec<OrderRecord>) -> Self {
        *self.orders.lock().unwrap() = orders;
        self
    }

    pub fn fail_imports(&self, message: Option<&str>) {
        *self.import_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn fail_exports(&self, message: &str, details: &str) {
        *self.export_result.lock().unwrap() = ExportResult::failure(message, details);
    }

    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub fn exported_ids(&self) -> Vec<i64> {
        self.exported.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectorPlugin for StaticConnectorPlugin {
    fn code(&self) -> &str {
        &self.code
    }

    async fn retrieve_orders(&self, _context: &ConnectorContext) -> ImportResult {
        self.imports.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.import_failure.lock().unwrap().clone() {
            return ImportResult::failure(message);
        }

        let orders = std::mem::take(&mut *self.orders.lock().unwrap());
        ImportResult::success(orders)
    }

    async fn export_result(&self, _context: &ConnectorContext, request: &Request) -> ExportResult {
        self.exported.lock().unwrap().push(request.id);
        self.export_result.lock().unwrap().clone()
    }
}

pub(crate) fn task_registry(plugins: Vec<Arc<dyn TaskPlugin>>) -> Arc<PluginRegistry<dyn TaskPlugin>> {
    let registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(plugin.code().to_string(), plugin);
    }
    Arc::new(registry)
}

pub(crate) fn connector_registry(
    plugins: Vec<Arc<dyn ConnectorPlugin>>,
) -> Arc<PluginRegistry<dyn ConnectorPlugin>> {
    let registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(plugin.code().to_string(), plugin);
    }
    Arc::new(registry)
}

/// Directory synchroniser counting its runs
pub(crate) struct CountingSynchronizer {
    runs: AtomicUsize,
    fail: bool,
}

impl CountingSynchronizer {
    pub fn new(fail: bool) -> Self {
        Self {
            runs: AtomicUsize::new(0),
            fail,
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::runners::DirectorySynchronizer for CountingSynchronizer {
    async fn synchronize(&self) -> Result<usize> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Internal("directory unreachable".to_string()));
        }
        Ok(3)
    }
}

/// Panics on its first synchronisation, succeeds afterwards
#[derive(Default)]
pub(crate) struct PanickingSynchronizer {
    calls: AtomicUsize,
}

impl PanickingSynchronizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::runners::DirectorySynchronizer for PanickingSynchronizer {
    async fn synchronize(&self) -> Result<usize> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("directory client crashed");
        }
        Ok(1)
    }
}
