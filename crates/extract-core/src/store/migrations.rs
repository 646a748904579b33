use super::SqliteStore;
use crate::error::{Error, Result};

const TABLES: &[(&str, &str)] = &[
    (
        "connectors",
        r#"
        CREATE TABLE IF NOT EXISTS connectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            import_frequency_secs INTEGER NOT NULL,
            parameters_json TEXT NOT NULL DEFAULT '{}',
            last_import_date TIMESTAMP,
            last_import_message TEXT,
            max_retries INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "processes",
        r#"
        CREATE TABLE IF NOT EXISTS processes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )
        "#,
    ),
    (
        "tasks",
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            code TEXT NOT NULL,
            label TEXT NOT NULL,
            parameters_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (process_id) REFERENCES processes(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            login TEXT NOT NULL UNIQUE,
            email TEXT,
            profile TEXT NOT NULL DEFAULT 'OPERATOR',
            active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "process_operators",
        r#"
        CREATE TABLE IF NOT EXISTS process_operators (
            process_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            PRIMARY KEY (process_id, user_id),
            FOREIGN KEY (process_id) REFERENCES processes(id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "rules",
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            connector_id INTEGER NOT NULL,
            process_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            expression TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            FOREIGN KEY (connector_id) REFERENCES connectors(id) ON DELETE CASCADE,
            FOREIGN KEY (process_id) REFERENCES processes(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "requests",
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            connector_id INTEGER,
            process_id INTEGER,
            order_label TEXT NOT NULL,
            order_guid TEXT NOT NULL,
            product_guid TEXT NOT NULL,
            product_label TEXT NOT NULL,
            organism TEXT NOT NULL,
            client TEXT NOT NULL,
            tiers TEXT,
            perimeter TEXT,
            surface REAL,
            parameters_json TEXT NOT NULL DEFAULT '{}',
            remark TEXT,
            rejected BOOLEAN NOT NULL DEFAULT FALSE,
            tasknum INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL,
            start_date TIMESTAMP,
            end_date TIMESTAMP,
            last_reminder TIMESTAMP,
            external_url TEXT
        )
        "#,
    ),
    (
        "request_history",
        r#"
        CREATE TABLE IF NOT EXISTS request_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id INTEGER NOT NULL,
            step INTEGER NOT NULL,
            process_step INTEGER NOT NULL,
            task_label TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT,
            start_date TIMESTAMP NOT NULL,
            end_date TIMESTAMP,
            FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "system_parameters",
        r#"
        CREATE TABLE IF NOT EXISTS system_parameters (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)",
    "CREATE INDEX IF NOT EXISTS idx_history_request ON request_history(request_id, step)",
    "CREATE INDEX IF NOT EXISTS idx_rules_connector ON rules(connector_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_process ON tasks(process_id, position)",
];

impl SqliteStore {
    /// Run database migrations
    pub(super) async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (table, statement) in TABLES {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Internal(format!("Migration failed ({}): {}", table, e)))?;
        }

        for statement in INDEXES {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Internal(format!("Migration failed (index): {}", e)))?;
        }

        tx.commit().await?;
        Ok(())
    }
}
