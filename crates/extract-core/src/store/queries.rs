use async_trait::async_trait;
use std::collections::HashMap;

use super::rows::{ConnectorRow, HistoryRow, RequestRow, RuleRow, TaskRow};
use super::SqliteStore;
use crate::domain::{Connector, HistoryRecord, Process, Request, RequestStatus, Rule, Task};
use crate::error::{Error, Result};
use crate::repositories::{
    ConnectorRepository, HistoryRepository, ParametersRepository, ProcessRepository,
    RequestRepository, RuleRepository, UserRepository,
};

const ADMIN_PROFILE: &str = "ADMIN";
const OPERATOR_PROFILE: &str = "OPERATOR";

impl SqliteStore {
    async fn connector_by_id(&self, id: i64) -> Result<Option<Connector>> {
        let row: Option<ConnectorRow> = sqlx::query_as("SELECT * FROM connectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Connector::try_from).transpose()
    }

    async fn request_by_id(&self, id: i64) -> Result<Option<Request>> {
        let row: Option<RequestRow> = sqlx::query_as("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Request::try_from).transpose()
    }

    /// Create a process
    pub async fn create_process(&self, name: &str) -> Result<Process> {
        let result = sqlx::query("INSERT INTO processes (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(Process {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Append a task to a process
    pub async fn add_task(
        &self,
        process_id: i64,
        position: i32,
        code: &str,
        label: &str,
        parameters: HashMap<String, String>,
    ) -> Result<Task> {
        let parameters_json = serde_json::to_string(&parameters)?;

        let result = sqlx::query(
            "INSERT INTO tasks (process_id, position, code, label, parameters_json) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(process_id)
        .bind(position)
        .bind(code)
        .bind(label)
        .bind(parameters_json)
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id: result.last_insert_rowid(),
            process_id,
            position,
            code: code.to_string(),
            label: label.to_string(),
            parameters,
        })
    }

    /// Add an active matching rule
    pub async fn add_rule(
        &self,
        connector_id: i64,
        process_id: i64,
        position: i32,
        expression: &str,
    ) -> Result<Rule> {
        let result = sqlx::query(
            "INSERT INTO rules (connector_id, process_id, position, expression, active) VALUES (?, ?, ?, ?, TRUE)",
        )
        .bind(connector_id)
        .bind(process_id)
        .bind(position)
        .bind(expression)
        .execute(&self.pool)
        .await?;

        Ok(Rule {
            id: result.last_insert_rowid(),
            connector_id,
            process_id,
            position,
            expression: expression.to_string(),
            active: true,
        })
    }

    /// Enable or disable a rule
    pub async fn set_rule_active(&self, rule_id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE rules SET active = ? WHERE id = ?")
            .bind(active)
            .bind(rule_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "rule",
                id: rule_id,
            });
        }

        Ok(())
    }

    /// Create a user, returning its ID
    pub async fn add_user(&self, login: &str, email: Option<&str>, administrator: bool) -> Result<i64> {
        let profile = if administrator { ADMIN_PROFILE } else { OPERATOR_PROFILE };

        let result = sqlx::query("INSERT INTO users (login, email, profile, active) VALUES (?, ?, ?, TRUE)")
            .bind(login)
            .bind(email)
            .bind(profile)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Enable or disable a user
    pub async fn set_user_active(&self, user_id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "user",
                id: user_id,
            });
        }

        Ok(())
    }

    /// Make a user an operator of a process
    pub async fn add_process_operator(&self, process_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO process_operators (process_id, user_id) VALUES (?, ?)")
            .bind(process_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ConnectorRepository for SqliteStore {
    async fn find_active(&self) -> Result<Vec<Connector>> {
        let rows: Vec<ConnectorRow> =
            sqlx::query_as("SELECT * FROM connectors WHERE active = TRUE ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Connector::try_from).collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Connector>> {
        self.connector_by_id(id).await
    }

    async fn save(&self, connector: &Connector) -> Result<Connector> {
        let parameters_json = serde_json::to_string(&connector.parameters)?;

        if connector.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO connectors (
                    name, code, active, import_frequency_secs, parameters_json,
                    last_import_date, last_import_message, max_retries, error_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&connector.name)
            .bind(&connector.code)
            .bind(connector.active)
            .bind(connector.import_frequency_secs)
            .bind(parameters_json)
            .bind(connector.last_import_date)
            .bind(&connector.last_import_message)
            .bind(connector.max_retries)
            .bind(connector.error_count)
            .execute(&self.pool)
            .await?;

            let mut saved = connector.clone();
            saved.id = result.last_insert_rowid();
            return Ok(saved);
        }

        let result = sqlx::query(
            r#"
            UPDATE connectors SET
                name = ?, code = ?, active = ?, import_frequency_secs = ?, parameters_json = ?,
                last_import_date = ?, last_import_message = ?, max_retries = ?, error_count = ?
            WHERE id = ?
            "#,
        )
        .bind(&connector.name)
        .bind(&connector.code)
        .bind(connector.active)
        .bind(connector.import_frequency_secs)
        .bind(parameters_json)
        .bind(connector.last_import_date)
        .bind(&connector.last_import_message)
        .bind(connector.max_retries)
        .bind(connector.error_count)
        .bind(connector.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "connector",
                id: connector.id,
            });
        }

        Ok(connector.clone())
    }
}

#[async_trait]
impl RequestRepository for SqliteStore {
    async fn find_by_status(&self, status: RequestStatus) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> =
            sqlx::query_as("SELECT * FROM requests WHERE status = ? ORDER BY id")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Request::try_from).collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Request>> {
        self.request_by_id(id).await
    }

    async fn save(&self, request: &Request) -> Result<Request> {
        let parameters_json = serde_json::to_string(&request.parameters)?;

        if request.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO requests (
                    connector_id, process_id, order_label, order_guid, product_guid,
                    product_label, organism, client, tiers, perimeter, surface,
                    parameters_json, remark, rejected, tasknum, status,
                    start_date, end_date, last_reminder, external_url
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(request.connector_id)
            .bind(request.process_id)
            .bind(&request.order_label)
            .bind(&request.order_guid)
            .bind(&request.product_guid)
            .bind(&request.product_label)
            .bind(&request.organism)
            .bind(&request.client)
            .bind(&request.tiers)
            .bind(&request.perimeter)
            .bind(request.surface)
            .bind(parameters_json)
            .bind(&request.remark)
            .bind(request.rejected)
            .bind(request.tasknum)
            .bind(request.status.as_str())
            .bind(request.start_date)
            .bind(request.end_date)
            .bind(request.last_reminder)
            .bind(&request.external_url)
            .execute(&self.pool)
            .await?;

            let mut saved = request.clone();
            saved.id = result.last_insert_rowid();
            return Ok(saved);
        }

        let result = sqlx::query(
            r#"
            UPDATE requests SET
                connector_id = ?, process_id = ?, order_label = ?, order_guid = ?, product_guid = ?,
                product_label = ?, organism = ?, client = ?, tiers = ?, perimeter = ?, surface = ?,
                parameters_json = ?, remark = ?, rejected = ?, tasknum = ?, status = ?,
                start_date = ?, end_date = ?, last_reminder = ?, external_url = ?
            WHERE id = ?
            "#,
        )
        .bind(request.connector_id)
        .bind(request.process_id)
        .bind(&request.order_label)
        .bind(&request.order_guid)
        .bind(&request.product_guid)
        .bind(&request.product_label)
        .bind(&request.organism)
        .bind(&request.client)
        .bind(&request.tiers)
        .bind(&request.perimeter)
        .bind(request.surface)
        .bind(parameters_json)
        .bind(&request.remark)
        .bind(request.rejected)
        .bind(request.tasknum)
        .bind(request.status.as_str())
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.last_reminder)
        .bind(&request.external_url)
        .bind(request.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "request",
                id: request.id,
            });
        }

        Ok(request.clone())
    }
}

#[async_trait]
impl HistoryRepository for SqliteStore {
    async fn find_by_request_order_by_step_desc(&self, request_id: i64) -> Result<Vec<HistoryRecord>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT * FROM request_history WHERE request_id = ? ORDER BY step DESC, id DESC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }

    async fn save(&self, record: &HistoryRecord) -> Result<HistoryRecord> {
        if record.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO request_history (
                    request_id, step, process_step, task_label, status, message, start_date, end_date
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.request_id)
            .bind(record.step)
            .bind(record.process_step)
            .bind(&record.task_label)
            .bind(record.status.as_str())
            .bind(&record.message)
            .bind(record.start_date)
            .bind(record.end_date)
            .execute(&self.pool)
            .await?;

            let mut saved = record.clone();
            saved.id = result.last_insert_rowid();
            return Ok(saved);
        }

        let result = sqlx::query(
            r#"
            UPDATE request_history SET
                request_id = ?, step = ?, process_step = ?, task_label = ?,
                status = ?, message = ?, start_date = ?, end_date = ?
            WHERE id = ?
            "#,
        )
        .bind(record.request_id)
        .bind(record.step)
        .bind(record.process_step)
        .bind(&record.task_label)
        .bind(record.status.as_str())
        .bind(&record.message)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "history record",
                id: record.id,
            });
        }

        Ok(record.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM request_history WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ProcessRepository for SqliteStore {
    async fn find_tasks(&self, process_id: i64) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE process_id = ? ORDER BY position, id")
                .bind(process_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn find_operator_addresses(&self, process_id: i64) -> Result<Vec<String>> {
        let addresses: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT u.email FROM users u
            JOIN process_operators po ON po.user_id = u.id
            WHERE po.process_id = ? AND u.active = TRUE AND u.email IS NOT NULL AND u.email <> ''
            ORDER BY u.email
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(addresses)
    }
}

#[async_trait]
impl RuleRepository for SqliteStore {
    async fn find_active_by_connector(&self, connector_id: i64) -> Result<Vec<Rule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT * FROM rules WHERE connector_id = ? AND active = TRUE ORDER BY position, id",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Rule::from).collect())
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn find_administrator_addresses(&self) -> Result<Vec<String>> {
        let addresses: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT email FROM users
            WHERE profile = ? AND active = TRUE AND email IS NOT NULL AND email <> ''
            ORDER BY email
            "#,
        )
        .bind(ADMIN_PROFILE)
        .fetch_all(&self.pool)
        .await?;

        Ok(addresses)
    }
}

#[async_trait]
impl ParametersRepository for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM system_parameters WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.flatten())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_parameters (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
