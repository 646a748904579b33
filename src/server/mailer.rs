//! Logging mailer
//!
//! Embedding applications plug a real transport in; the standalone binary
//! only writes notifications to the log.

use async_trait::async_trait;
use extract_core::{EmailMessage, EmailSettings, MessageCatalog, Result};
use tracing::info;

/// [`EmailSettings`] writing every message to the log
pub struct LogMailer {
    catalog: MessageCatalog,
    enabled: bool,
}

impl LogMailer {
    pub fn new(language: &str, enabled: bool) -> Self {
        Self {
            catalog: MessageCatalog::for_language(language),
            enabled,
        }
    }
}

#[async_trait]
impl EmailSettings for LogMailer {
    fn is_notification_enabled(&self) -> bool {
        self.enabled
    }

    fn message_string(&self, key: &str) -> String {
        self.catalog.get(key)
    }

    async fn send(&self, message: EmailMessage) -> Result<()> {
        info!(
            kind = %message.kind,
            recipients = %message.recipients.join(", "),
            subject = %message.subject,
            "Notification"
        );
        Ok(())
    }
}
