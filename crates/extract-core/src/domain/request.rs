use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    /// Imported, not matched to a process yet
    Imported,
    /// Tasks of the matched process are being run
    Ongoing,
    /// Waiting for an operator
    Standby,
    /// Failed; terminal until an operator acts
    Error,
    /// All tasks done, result not delivered yet
    #[serde(rename = "TOEXPORT")]
    ToExport,
    /// Result delivered
    Finished,
    /// Skipped by an operator
    Skipped,
}

impl RequestStatus {
    /// Persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "IMPORTED",
            Self::Ongoing => "ONGOING",
            Self::Standby => "STANDBY",
            Self::Error => "ERROR",
            Self::ToExport => "TOEXPORT",
            Self::Finished => "FINISHED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMPORTED" => Ok(Self::Imported),
            "ONGOING" => Ok(Self::Ongoing),
            "STANDBY" => Ok(Self::Standby),
            "ERROR" => Ok(Self::Error),
            "TOEXPORT" => Ok(Self::ToExport),
            "FINISHED" => Ok(Self::Finished),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(Error::Internal(format!("unknown request status: {}", other))),
        }
    }
}

/// Status of one history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryStatus {
    /// Attempt in progress
    Ongoing,
    /// Attempt waiting for an operator
    Standby,
    /// Attempt failed
    Error,
    /// Attempt succeeded
    Finished,
    /// Attempt skipped by an operator
    Skipped,
}

impl HistoryStatus {
    /// Persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ONGOING",
            Self::Standby => "STANDBY",
            Self::Error => "ERROR",
            Self::Finished => "FINISHED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONGOING" => Ok(Self::Ongoing),
            "STANDBY" => Ok(Self::Standby),
            "ERROR" => Ok(Self::Error),
            "FINISHED" => Ok(Self::Finished),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(Error::Internal(format!("unknown history status: {}", other))),
        }
    }
}

/// An order as returned by a connector plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order label
    pub order_label: String,
    /// Order identifier on the source server
    pub order_guid: String,
    /// Product identifier
    pub product_guid: String,
    /// Product label
    pub product_label: String,
    /// Ordering organism
    pub organism: String,
    /// Ordering client
    pub client: String,
    /// Third party, if any
    pub tiers: Option<String>,
    /// Order perimeter as WKT
    pub perimeter: Option<String>,
    /// Perimeter surface
    pub surface: Option<f64>,
    /// Free-form order parameters
    pub parameters: Value,
    /// Link to the order on the source server
    pub external_url: Option<String>,
}

/// A unit of work tracked from import to export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request ID (0 until saved)
    pub id: i64,
    /// Connector the request was imported from
    pub connector_id: Option<i64>,
    /// Process the request was matched to
    pub process_id: Option<i64>,
    /// Order label
    pub order_label: String,
    /// Order identifier on the source server
    pub order_guid: String,
    /// Product identifier
    pub product_guid: String,
    /// Product label
    pub product_label: String,
    /// Ordering organism
    pub organism: String,
    /// Ordering client
    pub client: String,
    /// Third party, if any
    pub tiers: Option<String>,
    /// Order perimeter as WKT
    pub perimeter: Option<String>,
    /// Perimeter surface
    pub surface: Option<f64>,
    /// Free-form order parameters
    pub parameters: Value,
    /// Remark returned to the client
    pub remark: Option<String>,
    /// Whether the request was rejected
    pub rejected: bool,
    /// 1-based number of the next task to run
    pub tasknum: i32,
    /// Current status
    pub status: RequestStatus,
    /// Import date
    pub start_date: Option<DateTime<Utc>>,
    /// Export date
    pub end_date: Option<DateTime<Utc>>,
    /// Last standby reminder sent to operators
    pub last_reminder: Option<DateTime<Utc>>,
    /// Link to the order on the source server
    pub external_url: Option<String>,
}

impl Request {
    /// Create an imported request from an order
    pub fn from_order(connector_id: i64, order: OrderRecord) -> Self {
        Self {
            id: 0,
            connector_id: Some(connector_id),
            process_id: None,
            order_label: order.order_label,
            order_guid: order.order_guid,
            product_guid: order.product_guid,
            product_label: order.product_label,
            organism: order.organism,
            client: order.client,
            tiers: order.tiers,
            perimeter: order.perimeter,
            surface: order.surface,
            parameters: order.parameters,
            remark: None,
            rejected: false,
            tasknum: 1,
            status: RequestStatus::Imported,
            start_date: Some(Utc::now()),
            end_date: None,
            last_reminder: None,
            external_url: order.external_url,
        }
    }

    /// Display label used in logs and notifications
    pub fn label(&self) -> String {
        format!("{} / {}", self.order_label, self.product_label)
    }
}

/// One attempt of a task (or of the export) on a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Record ID (0 until saved)
    pub id: i64,
    /// Request the record belongs to
    pub request_id: i64,
    /// 1-based position in the request history
    pub step: i32,
    /// Position of the task in the process
    pub process_step: i32,
    /// Task label
    pub task_label: String,
    /// Attempt status
    pub status: HistoryStatus,
    /// Result message
    pub message: Option<String>,
    /// Attempt start
    pub start_date: DateTime<Utc>,
    /// Attempt end
    pub end_date: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    /// Open an ONGOING record
    pub fn ongoing(request_id: i64, step: i32, process_step: i32, task_label: impl Into<String>) -> Self {
        Self {
            id: 0,
            request_id,
            step,
            process_step,
            task_label: task_label.into(),
            status: HistoryStatus::Ongoing,
            message: None,
            start_date: Utc::now(),
            end_date: None,
        }
    }

    /// Close the record with a final status and message
    pub fn close(&mut self, status: HistoryStatus, message: impl Into<String>) {
        self.status = status;
        self.message = Some(message.into());
        self.end_date = Some(Utc::now());
    }
}
