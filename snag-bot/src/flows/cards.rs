//! Defect cards and post-save field corrections

use crate::engine::{Engine, Handled};
use crate::ephemeral::{self, Purpose, StateKey};
use crate::inbound::ButtonAction;
use crate::messaging::{Button, MessageKind, OutboundMessage};
use serde::{Deserialize, Serialize};
use snag_common::db::{Defect, DefectStatus, EditableField, PhotoCounts};
use snag_common::{time, Error, FailureReason, Result};
use tracing::info;

/// Waiting for the corrected value of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEditState {
    pub human_id: String,
    pub field: EditableField,
}

pub fn render_card(defect: &Defect, counts: &PhotoCounts, utc_offset_minutes: i32) -> String {
    let due = defect
        .due_date
        .map(|d| time::format_date(&d, utc_offset_minutes))
        .unwrap_or_else(|| "—".to_string());

    let mut text = format!("#{} · {}\n", defect.human_id, defect.status.label());
    text.push_str(&format!("Object: {}\n", defect.object));
    if let Some(floor) = &defect.floor {
        text.push_str(&format!("Floor: {}\n", floor));
    }
    text.push_str(&format!(
        "Category: {} · Severity: {}\n",
        defect.category.label(),
        defect.severity.label()
    ));
    if let Some(description) = &defect.description {
        text.push_str(&format!("Description: {}\n", description));
    }
    text.push_str(&format!(
        "Responsible: {}\n",
        defect.assigned_to.as_deref().unwrap_or("—")
    ));
    text.push_str(&format!("Due: {}\n", due));
    text.push_str(&format!("Photos: before {} · after {}", counts.initial, counts.after));
    text
}

/// Lifecycle buttons shown under a card
pub fn card_keyboard(human_id: &str) -> Vec<Vec<Button>> {
    let id = human_id.to_string();
    vec![
        vec![Button::new("Add \"after\" photo", &ButtonAction::AddAfter(id.clone()))],
        vec![
            Button::new("Put on control", &ButtonAction::ControlMenu(id.clone())),
            Button::new(
                "Discovered",
                &ButtonAction::SetStatus(DefectStatus::Discovered, id.clone()),
            ),
        ],
        vec![Button::new(
            "Fixed",
            &ButtonAction::SetStatus(DefectStatus::Fixed, id.clone()),
        )],
        vec![Button::new("Edit", &ButtonAction::CardEditMenu(id))],
    ]
}

fn field_label(field: EditableField) -> &'static str {
    match field {
        EditableField::Object => "object",
        EditableField::Floor => "floor",
        EditableField::Description => "description",
    }
}

impl Engine {
    fn card_edit_key(actor: &str) -> StateKey {
        StateKey::new(actor, Purpose::CardEdit)
    }

    pub(crate) async fn load_card_edit(&self, actor: &str) -> Result<Option<CardEditState>> {
        ephemeral::load(self.ephemeral.as_ref(), &Self::card_edit_key(actor)).await
    }

    pub(crate) async fn clear_card_edit(&self, actor: &str) -> Result<()> {
        self.ephemeral.clear(&Self::card_edit_key(actor)).await
    }

    /// Tell `actor` why an operation on a defect was refused
    pub(crate) async fn reply_rejected(&self, actor: &str, human_id: &str, reason: FailureReason) {
        let text = match reason {
            FailureReason::NotFound => format!("#{} not found.", human_id),
            FailureReason::NoAfterPhotos => {
                format!("#{} needs at least one \"after\" photo before it can be closed.", human_id)
            }
            FailureReason::InvalidTransition => {
                format!("#{}: this status change is not allowed.", human_id)
            }
            FailureReason::MissingAssignee => "No responsible party given. Start over.".to_string(),
            FailureReason::DraftIncomplete => "The draft is not complete yet.".to_string(),
        };
        self.deliver(OutboundMessage::new(actor, MessageKind::Rejected(reason), text))
            .await;
    }

    /// Send the card of `human_id` to `actor` with every attached photo
    pub(crate) async fn show_card(&self, actor: &str, human_id: &str) -> Result<Handled> {
        let Some(defect) = self.store.get_by_human_id(human_id).await? else {
            self.reply_rejected(actor, human_id, FailureReason::NotFound).await;
            return Ok(Handled::Consumed);
        };

        let counts = self.store.photo_counts(&defect.id).await?;
        let photos = self
            .store
            .list_photos(&defect.id, None)
            .await?
            .into_iter()
            .map(|p| p.photo_ref)
            .collect();

        self.deliver(
            OutboundMessage::new(
                actor,
                MessageKind::Card,
                render_card(&defect, &counts, self.control.utc_offset_minutes),
            )
            .with_keyboard(card_keyboard(&defect.human_id))
            .with_photos(photos),
        )
        .await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn card_edit_menu(&self, actor: &str, human_id: &str) -> Result<Handled> {
        let field = |f: EditableField| {
            Button::new(field_label(f), &ButtonAction::CardEditField(f, human_id.to_string()))
        };
        self.deliver(
            OutboundMessage::new(
                actor,
                MessageKind::CardEditMenu,
                format!("What should be corrected in #{}?", human_id),
            )
            .with_keyboard(vec![
                vec![field(EditableField::Object), field(EditableField::Floor)],
                vec![field(EditableField::Description)],
                vec![Button::new("Back", &ButtonAction::Open(human_id.to_string()))],
            ]),
        )
        .await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn card_edit_start(
        &self,
        actor: &str,
        field: EditableField,
        human_id: &str,
    ) -> Result<Handled> {
        if self.store.get_by_human_id(human_id).await?.is_none() {
            self.reply_rejected(actor, human_id, FailureReason::NotFound).await;
            return Ok(Handled::Consumed);
        }

        let state = CardEditState {
            human_id: human_id.to_string(),
            field,
        };
        ephemeral::save(
            self.ephemeral.as_ref(),
            &Self::card_edit_key(actor),
            &state,
            self.control.wizard_ttl(),
        )
        .await?;

        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::CardEditPrompt,
            format!("Send the new {} for #{}.", field_label(field), human_id),
        ))
        .await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn card_edit_text(
        &self,
        actor: &str,
        state: CardEditState,
        text: &str,
    ) -> Result<Handled> {
        if text.trim().is_empty() {
            self.deliver(OutboundMessage::new(
                actor,
                MessageKind::CardEditPrompt,
                format!("An empty {} won't do. Send the new value.", field_label(state.field)),
            ))
            .await;
            return Ok(Handled::Consumed);
        }

        match self
            .store
            .update_field(&state.human_id, state.field, text, actor)
            .await
        {
            Ok(_) => {}
            Err(Error::Rejected(reason)) => {
                self.clear_card_edit(actor).await?;
                self.reply_rejected(actor, &state.human_id, reason).await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        }

        self.clear_card_edit(actor).await?;
        info!(actor = %actor, human_id = %state.human_id, field = %state.field, "Defect field corrected");

        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::FieldUpdated,
            format!("#{}: {} updated.", state.human_id, field_label(state.field)),
        ))
        .await;
        self.show_card(actor, &state.human_id).await
    }
}
