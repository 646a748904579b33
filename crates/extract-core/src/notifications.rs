//! Notification contracts
//!
//! The engine never talks to a mail server itself. It formats messages from
//! a per-language [`MessageCatalog`] and hands them to the host through
//! [`EmailSettings`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::Result;

/// Kind of notification sent by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Repeated import failures on a connector
    ImportFailed,
    /// No rule matched an imported request
    UnmatchedRequest,
    /// A task failed
    TaskFailed,
    /// A task put its request on standby
    TaskStandby,
    /// Reminder for a request still on standby
    StandbyReminder,
    /// Delivering a result failed
    ExportFailed,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ImportFailed => "import_failed",
            Self::UnmatchedRequest => "unmatched_request",
            Self::TaskFailed => "task_failed",
            Self::TaskStandby => "task_standby",
            Self::StandbyReminder => "standby_reminder",
            Self::ExportFailed => "export_failed",
        };
        f.write_str(name)
    }
}

/// A message ready to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Notification kind
    pub kind: NotificationKind,
    /// Recipient addresses
    pub recipients: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// E-mail settings and transport supplied by the host
#[async_trait]
pub trait EmailSettings: Send + Sync {
    /// Whether notifications are sent at all
    fn is_notification_enabled(&self) -> bool;

    /// Localized message for a catalogue key
    fn message_string(&self, key: &str) -> String;

    /// Send a message
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Localized strings used in history records and notifications
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    messages: HashMap<&'static str, &'static str>,
}

const MESSAGES_EN: &[(&str, &str)] = &[
    ("errors.task.interrupted", "The processing of this task was interrupted."),
    ("requestHistory.tasks.export.label", "Export"),
    ("requestHistory.matching.label", "Process matching"),
    ("requestMatching.noMatch", "No rule matches this request."),
    ("requestTask.remark.tooLong", "The remark exceeds the maximum length."),
    ("requestTask.rejected.noRemark", "A rejected request must have a remark."),
    ("requestTask.result.null", "(Null)"),
    ("email.importFailed.subject", "Extract - Import failed"),
    ("email.unmatched.subject", "Extract - Request without matching process"),
    ("email.taskFailed.subject", "Extract - Task failed"),
    ("email.taskStandby.subject", "Extract - Request awaiting validation"),
    ("email.standbyReminder.subject", "Extract - Reminder: request awaiting validation"),
    ("email.exportFailed.subject", "Extract - Export failed"),
];

const MESSAGES_FR: &[(&str, &str)] = &[
    ("errors.task.interrupted", "Le traitement de cette tâche a été interrompu."),
    ("requestHistory.tasks.export.label", "Exportation"),
    ("requestHistory.matching.label", "Attribution du traitement"),
    ("requestMatching.noMatch", "Aucune règle ne correspond à cette demande."),
    ("requestTask.remark.tooLong", "La remarque dépasse la longueur maximale."),
    ("requestTask.rejected.noRemark", "Une demande refusée doit avoir une remarque."),
    ("requestTask.result.null", "(Null)"),
    ("email.importFailed.subject", "Extract - Échec de l'importation"),
    ("email.unmatched.subject", "Extract - Demande sans traitement correspondant"),
    ("email.taskFailed.subject", "Extract - Échec d'une tâche"),
    ("email.taskStandby.subject", "Extract - Demande en attente de validation"),
    ("email.standbyReminder.subject", "Extract - Rappel : demande en attente de validation"),
    ("email.exportFailed.subject", "Extract - Échec de l'exportation"),
];

impl MessageCatalog {
    /// Catalogue for a language code, falling back to English
    pub fn for_language(language: &str) -> Self {
        let primary = language
            .split([',', '-', '_'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let entries = match primary.as_str() {
            "fr" => MESSAGES_FR,
            _ => MESSAGES_EN,
        };

        Self {
            messages: entries.iter().copied().collect(),
        }
    }

    /// Message for a key; unknown keys are returned as-is
    pub fn get(&self, key: &str) -> String {
        self.messages
            .get(key)
            .map(|message| (*message).to_string())
            .unwrap_or_else(|| key.to_string())
    }
}

/// Send a notification if enabled and addressed
///
/// Failures are logged and reported as `false`; they never interrupt the
/// job that triggered the notification.
pub(crate) async fn notify(
    settings: &dyn EmailSettings,
    kind: NotificationKind,
    recipients: Vec<String>,
    subject_key: &str,
    body: String,
) -> bool {
    if !settings.is_notification_enabled() {
        debug!(kind = %kind, "Notifications are disabled, message not sent");
        return false;
    }

    if recipients.is_empty() {
        warn!(kind = %kind, "No recipient for notification, message not sent");
        return false;
    }

    let message = EmailMessage {
        kind,
        recipients,
        subject: settings.message_string(subject_key),
        body,
    };

    match settings.send(message).await {
        Ok(()) => true,
        Err(e) => {
            warn!(kind = %kind, "Failed to send notification: {}", e);
            false
        }
    }
}
