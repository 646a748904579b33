use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::RunnerContext;
use crate::domain::{Connector, Request};
use crate::error::{Error, Result};
use crate::notifications::{notify, NotificationKind};
use crate::plugins::{retrieve_orders_guarded, ConnectorContext, ConnectorPlugin};

/// Imports the orders of one connector
pub struct ConnectorImportRunner {
    connector_id: i64,
    plugin: Arc<dyn ConnectorPlugin>,
    context: RunnerContext,
}

impl ConnectorImportRunner {
    /// Create a runner bound to a connector and its plugin
    pub fn new(connector_id: i64, plugin: Arc<dyn ConnectorPlugin>, context: RunnerContext) -> Self {
        Self {
            connector_id,
            plugin,
            context,
        }
    }

    /// Run one import
    pub async fn run(&self) {
        match self.import().await {
            Ok(count) => debug!(connector_id = self.connector_id, count, "Import job done"),
            Err(e) => error!(connector_id = self.connector_id, "Import job failed: {}", e),
        }
    }

    /// Import the orders, returning how many requests were created
    pub async fn import(&self) -> Result<usize> {
        let connector = self
            .context
            .repositories
            .connectors
            .find_by_id(self.connector_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "connector",
                id: self.connector_id,
            })?;

        if self.plugin.code() != connector.code {
            return Err(Error::Plugin(format!(
                "plugin {} cannot import for connector {} of type {}",
                self.plugin.code(),
                connector.name,
                connector.code
            )));
        }

        debug!(connector = %connector.name, "Importing orders");

        let plugin_context = ConnectorContext {
            language: self.context.language.clone(),
            parameters: connector.parameters.clone(),
        };
        let result = retrieve_orders_guarded(self.plugin.as_ref(), &plugin_context).await;

        if !result.success {
            let message = result
                .error_message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| "Unknown import error".to_string());
            warn!(connector = %connector.name, "The orders import failed: {}", message);
            self.update_last_import(connector, Err(message)).await?;
            return Ok(0);
        }

        let mut imported = 0;

        for order in result.orders {
            let guid = order.order_guid.clone();
            let request = Request::from_order(connector.id, order);

            match self.context.repositories.requests.save(&request).await {
                Ok(saved) => {
                    debug!(request_id = saved.id, order = %guid, "Order imported");
                    imported += 1;
                }
                Err(e) => error!(connector = %connector.name, order = %guid, "Could not save the imported order: {}", e),
            }
        }

        info!(connector = %connector.name, imported, "Orders imported");
        self.update_last_import(connector, Ok(())).await?;

        Ok(imported)
    }

    async fn update_last_import(
        &self,
        mut connector: Connector,
        outcome: std::result::Result<(), String>,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                connector.error_count = 0;
                connector.last_import_message = None;
            }
            Err(message) => {
                let was_in_error = connector.is_in_error();

                if !was_in_error {
                    connector.error_count = connector.error_count.saturating_add(1);
                }

                if connector.is_in_error() {
                    let message_changed =
                        connector.last_import_message.as_deref() != Some(message.as_str());

                    if !was_in_error || message_changed {
                        self.notify_failure(&connector, &message).await;
                    }

                    connector.last_import_message = Some(message);
                }
            }
        }

        connector.last_import_date = Some(Utc::now());
        self.context.repositories.connectors.save(&connector).await?;

        Ok(())
    }

    async fn notify_failure(&self, connector: &Connector, message: &str) {
        let recipients = self.context.administrator_addresses().await;
        let body = format!(
            "The import of orders for connector \"{}\" failed {} time(s).\n\n{}",
            connector.name, connector.error_count, message
        );

        notify(
            self.context.email_settings.as_ref(),
            NotificationKind::ImportFailed,
            recipients,
            "email.importFailed.subject",
            body,
        )
        .await;
    }
}
