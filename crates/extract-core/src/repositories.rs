//! Data access contracts
//!
//! The engine reads persisted state fresh on every tick and writes entities
//! back with `save`. Nothing beyond read-committed, last-write-wins semantics
//! is assumed. [`crate::SqliteStore`] implements every trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{Connector, HistoryRecord, Request, RequestStatus, Rule, Task};
use crate::error::Result;

/// Connector access
#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    /// Connectors flagged active
    async fn find_active(&self) -> Result<Vec<Connector>>;

    /// Connector by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<Connector>>;

    /// Insert (ID 0) or update a connector
    async fn save(&self, connector: &Connector) -> Result<Connector>;
}

/// Request access
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Requests in a status, oldest first
    async fn find_by_status(&self, status: RequestStatus) -> Result<Vec<Request>>;

    /// Request by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<Request>>;

    /// Insert (ID 0) or update a request
    async fn save(&self, request: &Request) -> Result<Request>;
}

/// Request history access
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// History of a request, most recent step first
    async fn find_by_request_order_by_step_desc(&self, request_id: i64)
        -> Result<Vec<HistoryRecord>>;

    /// Insert (ID 0) or update a record
    async fn save(&self, record: &HistoryRecord) -> Result<HistoryRecord>;

    /// Remove a record
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Process definition access
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Tasks of a process ordered by position
    async fn find_tasks(&self, process_id: i64) -> Result<Vec<Task>>;

    /// E-mail addresses of the operators of a process
    async fn find_operator_addresses(&self, process_id: i64) -> Result<Vec<String>>;
}

/// Matching rule access
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Active rules of a connector ordered by position
    async fn find_active_by_connector(&self, connector_id: i64) -> Result<Vec<Rule>>;
}

/// User access
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// E-mail addresses of the active administrators
    async fn find_administrator_addresses(&self) -> Result<Vec<String>>;
}

/// System parameter access
#[async_trait]
pub trait ParametersRepository: Send + Sync {
    /// Value of a parameter
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a parameter
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Repository handles shared by every scheduler and runner
#[derive(Clone)]
pub struct Repositories {
    /// Connectors
    pub connectors: Arc<dyn ConnectorRepository>,
    /// Requests
    pub requests: Arc<dyn RequestRepository>,
    /// Request history
    pub history: Arc<dyn HistoryRepository>,
    /// Processes and tasks
    pub processes: Arc<dyn ProcessRepository>,
    /// Matching rules
    pub rules: Arc<dyn RuleRepository>,
    /// Users
    pub users: Arc<dyn UserRepository>,
    /// System parameters
    pub parameters: Arc<dyn ParametersRepository>,
}

impl Repositories {
    /// Use one store for every repository
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ConnectorRepository
            + RequestRepository
            + HistoryRepository
            + ProcessRepository
            + RuleRepository
            + UserRepository
            + ParametersRepository
            + 'static,
    {
        Self {
            connectors: store.clone(),
            requests: store.clone(),
            history: store.clone(),
            processes: store.clone(),
            rules: store.clone(),
            users: store.clone(),
            parameters: store,
        }
    }
}
