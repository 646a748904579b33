use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use super::RunnerContext;
use crate::domain::{Request, RequestStatus};
use crate::error::Result;
use crate::notifications::{notify, NotificationKind};
use crate::settings::keys;

/// Reminds operators of requests left in standby
pub struct StandbyReminderRunner {
    context: RunnerContext,
}

impl StandbyReminderRunner {
    /// Create a runner
    pub fn new(context: RunnerContext) -> Self {
        Self { context }
    }

    /// Send the reminders that are due, returning how many were sent
    pub async fn run(&self) -> usize {
        match self.send_due_reminders(Utc::now()).await {
            Ok(sent) => {
                if sent > 0 {
                    info!(sent, "Standby reminders sent");
                }
                sent
            }
            Err(e) => {
                error!("Could not send the standby reminders: {}", e);
                0
            }
        }
    }

    async fn reminder_days(&self) -> Result<i64> {
        let value = self
            .context
            .repositories
            .parameters
            .get(keys::STANDBY_REMINDER_DAYS)
            .await?;

        Ok(value
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(0))
    }

    async fn send_due_reminders(&self, now: DateTime<Utc>) -> Result<usize> {
        let days = self.reminder_days().await?;

        if days == 0 {
            debug!("Standby reminders are disabled");
            return Ok(0);
        }

        let Some(limit) = Duration::try_days(days).and_then(|delay| now.checked_sub_signed(delay))
        else {
            warn!(days, "Standby reminder delay out of range, no reminder sent");
            return Ok(0);
        };

        let requests = self
            .context
            .repositories
            .requests
            .find_by_status(RequestStatus::Standby)
            .await?;

        let mut sent = 0;

        for mut request in requests {
            let due = request.last_reminder.map_or(true, |last| last <= limit);
            if !due {
                continue;
            }

            if self.remind(&request, days).await {
                request.last_reminder = Some(now);
                match self.context.repositories.requests.save(&request).await {
                    Ok(_) => sent += 1,
                    Err(e) => error!(request_id = request.id, "Could not store the reminder date: {}", e),
                }
            }
        }

        Ok(sent)
    }

    async fn remind(&self, request: &Request, days: i64) -> bool {
        let recipients = self.context.operator_addresses(request.process_id).await;

        notify(
            self.context.email_settings.as_ref(),
            NotificationKind::StandbyReminder,
            recipients,
            "email.standbyReminder.subject",
            format!(
                "The request \"{}\" has been waiting for an operator for more than {} day(s).",
                request.label(),
                days
            ),
        )
        .await
    }
}
