use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::domain::{Connector, HistoryRecord, Request, Rule, Task};
use crate::error::{Error, Result};

fn parse_parameters(json: &str) -> Result<HashMap<String, String>> {
    if json.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(json)?)
}

#[derive(FromRow)]
pub(super) struct ConnectorRow {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub active: bool,
    pub import_frequency_secs: i64,
    pub parameters_json: String,
    pub last_import_date: Option<DateTime<Utc>>,
    pub last_import_message: Option<String>,
    pub max_retries: i32,
    pub error_count: i32,
}

impl TryFrom<ConnectorRow> for Connector {
    type Error = Error;

    fn try_from(row: ConnectorRow) -> Result<Self> {
        Ok(Connector {
            id: row.id,
            name: row.name,
            code: row.code,
            active: row.active,
            import_frequency_secs: row.import_frequency_secs,
            parameters: parse_parameters(&row.parameters_json)?,
            last_import_date: row.last_import_date,
            last_import_message: row.last_import_message,
            max_retries: row.max_retries,
            error_count: row.error_count,
        })
    }
}

#[derive(FromRow)]
pub(super) struct TaskRow {
    pub id: i64,
    pub process_id: i64,
    pub position: i32,
    pub code: String,
    pub label: String,
    pub parameters_json: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            process_id: row.process_id,
            position: row.position,
            code: row.code,
            label: row.label,
            parameters: parse_parameters(&row.parameters_json)?,
        })
    }
}

#[derive(FromRow)]
pub(super) struct RuleRow {
    pub id: i64,
    pub connector_id: i64,
    pub process_id: i64,
    pub position: i32,
    pub expression: String,
    pub active: bool,
}

impl From<RuleRow> for Rule {
    fn from(row: RuleRow) -> Self {
        Rule {
            id: row.id,
            connector_id: row.connector_id,
            process_id: row.process_id,
            position: row.position,
            expression: row.expression,
            active: row.active,
        }
    }
}

#[derive(FromRow)]
pub(super) struct RequestRow {
    pub id: i64,
    pub connector_id: Option<i64>,
    pub process_id: Option<i64>,
    pub order_label: String,
    pub order_guid: String,
    pub product_guid: String,
    pub product_label: String,
    pub organism: String,
    pub client: String,
    pub tiers: Option<String>,
    pub perimeter: Option<String>,
    pub surface: Option<f64>,
    pub parameters_json: String,
    pub remark: Option<String>,
    pub rejected: bool,
    pub tasknum: i32,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_reminder: Option<DateTime<Utc>>,
    pub external_url: Option<String>,
}

impl TryFrom<RequestRow> for Request {
    type Error = Error;

    fn try_from(row: RequestRow) -> Result<Self> {
        let parameters = if row.parameters_json.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&row.parameters_json)?
        };

        Ok(Request {
            id: row.id,
            connector_id: row.connector_id,
            process_id: row.process_id,
            order_label: row.order_label,
            order_guid: row.order_guid,
            product_guid: row.product_guid,
            product_label: row.product_label,
            organism: row.organism,
            client: row.client,
            tiers: row.tiers,
            perimeter: row.perimeter,
            surface: row.surface,
            parameters,
            remark: row.remark,
            rejected: row.rejected,
            tasknum: row.tasknum,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            last_reminder: row.last_reminder,
            external_url: row.external_url,
        })
    }
}

#[derive(FromRow)]
pub(super) struct HistoryRow {
    pub id: i64,
    pub request_id: i64,
    pub step: i32,
    pub process_step: i32,
    pub task_label: String,
    pub status: String,
    pub message: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(HistoryRecord {
            id: row.id,
            request_id: row.request_id,
            step: row.step,
            process_step: row.process_step,
            task_label: row.task_label,
            status: row.status.parse()?,
            message: row.message,
            start_date: row.start_date,
            end_date: row.end_date,
        })
    }
}
