use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A processing definition applied to matched requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Process ID
    pub id: i64,
    /// Display name
    pub name: String,
}

/// One step of a process, executed by a task plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: i64,
    /// Owning process
    pub process_id: i64,
    /// 1-based position in the process
    pub position: i32,
    /// Code of the task plugin
    pub code: String,
    /// Label written to the request history
    pub label: String,
    /// Plugin parameter values
    pub parameters: HashMap<String, String>,
}

/// A matching rule binding requests from a connector to a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule ID
    pub id: i64,
    /// Connector whose requests the rule applies to
    pub connector_id: i64,
    /// Process assigned on match
    pub process_id: i64,
    /// Evaluation order within the connector
    pub position: i32,
    /// Rule expression
    pub expression: String,
    /// Whether the rule is evaluated
    pub active: bool,
}
