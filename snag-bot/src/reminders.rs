//! Overdue reminder sweep
//!
//! Periodically finds defects past their due date that have not been reminded
//! within the cooldown, claims each one atomically, then notifies the
//! responsible party and the reporter. The claim commits before any message
//! goes out, so overlapping sweeps never notify the same defect twice.

use crate::db::DefectStore;
use crate::flows::lists::mini_card_keyboard;
use crate::messaging::{numeric_recipient, MessageKind, Messenger, OutboundMessage};
use chrono::{DateTime, Utc};
use snag_common::config::ReminderConfig;
use snag_common::db::Defect;
use snag_common::events::SnagEvent;
use snag_common::{time, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Actor recorded on reminder audit rows
pub const SYSTEM_ACTOR: &str = "system";

pub struct ReminderService {
    store: DefectStore,
    messenger: Arc<dyn Messenger>,
    config: ReminderConfig,
    utc_offset_minutes: i32,
    event_tx: broadcast::Sender<SnagEvent>,
}

/// Who hears about an overdue defect
///
/// The responsible party when directly addressable, and the reporter when
/// different from the responsible party.
pub fn reminder_recipients(defect: &Defect) -> Vec<String> {
    let mut recipients = Vec::new();
    if let Some(assignee) = defect.assigned_to.as_deref().and_then(numeric_recipient) {
        recipients.push(assignee.to_string());
    }
    if defect.assigned_to.as_deref() != Some(defect.created_by.as_str())
        && !recipients.contains(&defect.created_by)
    {
        recipients.push(defect.created_by.clone());
    }
    recipients
}

impl ReminderService {
    pub fn new(
        store: DefectStore,
        messenger: Arc<dyn Messenger>,
        config: ReminderConfig,
        utc_offset_minutes: i32,
        event_tx: broadcast::Sender<SnagEvent>,
    ) -> Self {
        Self {
            store,
            messenger,
            config,
            utc_offset_minutes,
            event_tx,
        }
    }

    /// Start the background sweep loop
    pub fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("ReminderService disabled by configuration");
            return;
        }

        info!(
            "Starting ReminderService (interval: {}s, batch: {}, cooldown: {}h)",
            self.config.interval_secs, self.config.batch_size, self.config.cooldown_hours
        );

        tokio::spawn(async move {
            let mut timer = interval(self.config.interval());
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                timer.tick().await;

                match self.sweep_once(time::now()).await {
                    Ok(0) => debug!("ReminderService: nothing overdue"),
                    Ok(count) => info!("ReminderService: reminded {} overdue defects", count),
                    Err(e) => error!("ReminderService: sweep failed: {}", e),
                }
            }
        });
    }

    /// Run one sweep as of `now`, returning how many defects were reminded
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cooldown = self.config.cooldown();
        let candidates = self
            .store
            .overdue_candidates(now, cooldown, self.config.batch_size)
            .await?;

        let mut reminded = 0;
        for defect in candidates {
            let recipients = reminder_recipients(&defect);

            let claimed = self
                .store
                .claim_overdue(&defect.id, now, cooldown, &recipients, SYSTEM_ACTOR)
                .await?;
            if !claimed {
                debug!(human_id = %defect.human_id, "Reminder already claimed elsewhere");
                continue;
            }

            for recipient in &recipients {
                let message = self.reminder_message(recipient, &defect);
                if let Err(e) = self.messenger.send(message).await {
                    warn!(
                        human_id = %defect.human_id,
                        recipient = %recipient,
                        "Overdue reminder delivery failed: {}",
                        e
                    );
                }
            }

            let _ = self.event_tx.send(SnagEvent::OverdueReminded {
                human_id: defect.human_id.clone(),
                recipients,
                timestamp: now,
            });
            reminded += 1;
        }

        Ok(reminded)
    }

    fn reminder_message(&self, recipient: &str, defect: &Defect) -> OutboundMessage {
        let due = defect
            .due_date
            .map(|d| time::format_date(&d, self.utc_offset_minutes))
            .unwrap_or_else(|| "—".to_string());
        OutboundMessage::new(
            recipient,
            MessageKind::OverdueReminder,
            format!(
                "Overdue: #{}\nObject: {}\nDue: {}",
                defect.human_id, defect.object, due
            ),
        )
        .with_keyboard(mini_card_keyboard(&defect.human_id))
    }
}
