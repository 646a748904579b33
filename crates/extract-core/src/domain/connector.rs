use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A configured source of requests, served by a connector plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    /// Connector ID (0 until saved)
    pub id: i64,
    /// Display name
    pub name: String,
    /// Code of the plugin serving this connector
    pub code: String,
    /// Whether imports are scheduled for this connector
    pub active: bool,
    /// Import cadence in seconds
    pub import_frequency_secs: i64,
    /// Plugin parameter values
    pub parameters: HashMap<String, String>,
    /// Last import attempt
    pub last_import_date: Option<DateTime<Utc>>,
    /// Message of the last import attempt
    pub last_import_message: Option<String>,
    /// Number of consecutive failures tolerated before administrators are alerted
    pub max_retries: i32,
    /// Consecutive import failures
    pub error_count: i32,
}

impl Connector {
    /// Create a new active connector
    pub fn new(name: impl Into<String>, code: impl Into<String>, import_frequency_secs: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            code: code.into(),
            active: true,
            import_frequency_secs,
            parameters: HashMap::new(),
            last_import_date: None,
            last_import_message: None,
            max_retries: 0,
            error_count: 0,
        }
    }

    /// Set a plugin parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the number of tolerated consecutive failures
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Import cadence in milliseconds
    pub fn import_delay_ms(&self) -> i64 {
        self.import_frequency_secs.saturating_mul(1000)
    }

    /// Whether the failure count exceeds the tolerated retries
    pub fn is_in_error(&self) -> bool {
        self.error_count > self.max_retries
    }
}
