//! "After" photos and closing defects
//!
//! While after-mode is active every photo from the actor is attached to one
//! defect with role `after` instead of feeding a draft.

use crate::engine::{Engine, Handled};
use crate::ephemeral::{self, Purpose, StateKey};
use crate::inbound::ButtonAction;
use crate::messaging::{Button, MessageKind, OutboundMessage};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snag_common::db::{DefectStatus, PhotoRole};
use snag_common::events::SnagEvent;
use snag_common::{time, Error, FailureReason, Result};
use tracing::info;

static FIXED_CAPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:устранен[оа]?|закрыт[оа]?|fixed)\b.*?#?\b(D-\d{6})\b").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfterModeState {
    pub human_id: String,
    pub started_at: DateTime<Utc>,
}

/// Defect a "fixed #D-000123" style caption asks to close
pub fn caption_close_target(caption: &str) -> Option<String> {
    FIXED_CAPTION_RE
        .captures(caption)
        .map(|caps| caps[1].to_uppercase())
}

fn fixed_keyboard(human_id: &str) -> Vec<Vec<Button>> {
    vec![vec![Button::new(
        "Fixed",
        &ButtonAction::SetFixed(human_id.to_string()),
    )]]
}

impl Engine {
    fn after_key(actor: &str) -> StateKey {
        StateKey::new(actor, Purpose::AfterMode)
    }

    pub async fn load_after_mode(&self, actor: &str) -> Result<Option<AfterModeState>> {
        ephemeral::load(self.ephemeral.as_ref(), &Self::after_key(actor)).await
    }

    pub(crate) async fn clear_after_mode(&self, actor: &str) -> Result<()> {
        self.ephemeral.clear(&Self::after_key(actor)).await
    }

    async fn enter_after_mode(&self, actor: &str, human_id: &str) -> Result<()> {
        let state = AfterModeState {
            human_id: human_id.to_string(),
            started_at: time::now(),
        };
        ephemeral::save(
            self.ephemeral.as_ref(),
            &Self::after_key(actor),
            &state,
            self.control.after_mode_ttl(),
        )
        .await
    }

    /// "Add after photo" pressed
    pub(crate) async fn after_mode_start(&self, actor: &str, human_id: &str) -> Result<Handled> {
        match self.store.get_by_human_id(human_id).await? {
            None => {
                self.reply_rejected(actor, human_id, FailureReason::NotFound).await;
                return Ok(Handled::Consumed);
            }
            Some(defect) if defect.status == DefectStatus::Fixed => {
                self.reply_rejected(actor, human_id, FailureReason::InvalidTransition)
                    .await;
                return Ok(Handled::Consumed);
            }
            Some(_) => {}
        }

        self.enter_after_mode(actor, human_id).await?;
        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::AfterModePrompt,
            format!("Send one or more \"after\" photos for #{}.", human_id),
        ))
        .await;
        Ok(Handled::Consumed)
    }

    async fn attach_after_photo(&self, actor: &str, human_id: &str, photo_ref: &str) -> Result<()> {
        self.store
            .add_photos(human_id, PhotoRole::After, &[photo_ref.to_string()], actor)
            .await?;
        self.publish(SnagEvent::PhotosAdded {
            human_id: human_id.to_string(),
            role: PhotoRole::After,
            count: 1,
            timestamp: time::now(),
        });
        Ok(())
    }

    pub(crate) async fn after_mode_photo(
        &self,
        actor: &str,
        state: AfterModeState,
        photo_ref: &str,
    ) -> Result<Handled> {
        match self.attach_after_photo(actor, &state.human_id, photo_ref).await {
            Ok(()) => {}
            Err(Error::Rejected(reason)) => {
                self.clear_after_mode(actor).await?;
                self.reply_rejected(actor, &state.human_id, reason).await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        }

        self.deliver(
            OutboundMessage::new(
                actor,
                MessageKind::AfterPhotoAdded,
                format!(
                    "Added 1 \"after\" photo to #{}. Send more or press \"Fixed\".",
                    state.human_id
                ),
            )
            .with_keyboard(fixed_keyboard(&state.human_id)),
        )
        .await;
        Ok(Handled::Consumed)
    }

    /// Photo captioned "fixed #D-000123" with no draft and no after-mode
    pub(crate) async fn caption_close(&self, actor: &str, human_id: &str, photo_ref: &str) -> Result<Handled> {
        match self.attach_after_photo(actor, human_id, photo_ref).await {
            Ok(()) => {}
            Err(Error::Rejected(reason)) => {
                self.reply_rejected(actor, human_id, reason).await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        }
        self.set_status(actor, DefectStatus::Fixed, human_id).await
    }

    /// Apply a status button
    ///
    /// A close refused for lack of "after" photos switches the actor into
    /// after-mode for that defect.
    pub(crate) async fn set_status(&self, actor: &str, to: DefectStatus, human_id: &str) -> Result<Handled> {
        let transition = match self.store.transition(human_id, to, actor).await {
            Ok(transition) => transition,
            Err(Error::Rejected(FailureReason::NoAfterPhotos)) => {
                self.enter_after_mode(actor, human_id).await?;
                self.deliver(OutboundMessage::new(
                    actor,
                    MessageKind::AfterModePrompt,
                    format!(
                        "#{} needs an \"after\" photo first. Send one or more, then press \"Fixed\" again.",
                        human_id
                    ),
                ))
                .await;
                return Ok(Handled::Consumed);
            }
            Err(Error::Rejected(reason)) => {
                self.reply_rejected(actor, human_id, reason).await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        };

        if to == DefectStatus::Fixed {
            if let Some(state) = self.load_after_mode(actor).await? {
                if state.human_id == human_id {
                    self.clear_after_mode(actor).await?;
                }
            }
        }

        self.publish(SnagEvent::StatusChanged {
            human_id: human_id.to_string(),
            from: transition.from,
            to,
            actor: actor.to_string(),
            timestamp: transition.defect.updated_at,
        });
        info!(actor = %actor, human_id = %human_id, to = %to, "Status set");

        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::StatusChanged,
            format!("#{}: {} → {}.", human_id, transition.from.label(), to.label()),
        ))
        .await;
        self.show_card(actor, human_id).await
    }
}
