//! Draft assembly
//!
//! `photo → object → floor → category → severity → description → preview`.
//! The photo step never advances on its own: the debounce scheduler fires
//! once a burst has gone quiet and [`Engine::on_debounce_fired`] re-reads the
//! draft before moving it on.

use crate::debounce::{BurstKind, DebounceFired};
use crate::db::{NewDefect, NewPhoto};
use crate::engine::{Engine, Handled};
use crate::ephemeral::{self, Purpose, StateKey};
use crate::flows::cards;
use crate::inbound::ButtonAction;
use crate::messaging::{Button, MessageKind, OutboundMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snag_common::db::{Category, PhotoRole, Severity};
use snag_common::events::SnagEvent;
use snag_common::{time, Error, FailureReason, Result};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStep {
    Photo,
    Object,
    Floor,
    Category,
    Severity,
    Description,
    Preview,
}

impl DraftStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStep::Photo => "photo",
            DraftStep::Object => "object",
            DraftStep::Floor => "floor",
            DraftStep::Category => "category",
            DraftStep::Severity => "severity",
            DraftStep::Description => "description",
            DraftStep::Preview => "preview",
        }
    }

    /// Argument of the `def_edit:<target>` button
    pub fn edit_target(&self) -> &'static str {
        match self {
            DraftStep::Photo => "photos",
            other => other.as_str(),
        }
    }

    pub fn from_edit_target(target: &str) -> Option<DraftStep> {
        match target {
            "photos" => Some(DraftStep::Photo),
            "object" => Some(DraftStep::Object),
            "floor" => Some(DraftStep::Floor),
            "category" => Some(DraftStep::Category),
            "severity" => Some(DraftStep::Severity),
            "description" => Some(DraftStep::Description),
            _ => None,
        }
    }

    pub fn next(&self) -> DraftStep {
        match self {
            DraftStep::Photo => DraftStep::Object,
            DraftStep::Object => DraftStep::Floor,
            DraftStep::Floor => DraftStep::Category,
            DraftStep::Category => DraftStep::Severity,
            DraftStep::Severity => DraftStep::Description,
            DraftStep::Description | DraftStep::Preview => DraftStep::Preview,
        }
    }

    /// Steps answered with free text
    pub fn is_text(&self) -> bool {
        matches!(self, DraftStep::Object | DraftStep::Floor | DraftStep::Description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPhoto {
    pub photo_ref: String,
    pub role: PhotoRole,
}

/// In-progress defect submission of one actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub step: DraftStep,
    #[serde(default)]
    pub photos: Vec<DraftPhoto>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pending_group_id: Option<String>,
    #[serde(default)]
    pub last_photo_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_asked: Option<DraftStep>,
    /// Set while correcting a field from the preview
    #[serde(default)]
    pub return_to_preview: bool,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            step: DraftStep::Photo,
            photos: Vec::new(),
            object: None,
            floor: None,
            category: None,
            severity: None,
            description: None,
            pending_group_id: None,
            last_photo_at: None,
            last_asked: None,
            return_to_preview: false,
        }
    }
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a photo unless its reference is already present
    pub fn add_photo(&mut self, photo_ref: &str, role: PhotoRole) -> bool {
        if self.photos.iter().any(|p| p.photo_ref == photo_ref) {
            return false;
        }
        self.photos.push(DraftPhoto {
            photo_ref: photo_ref.to_string(),
            role,
        });
        true
    }

    pub fn photo_refs(&self) -> Vec<String> {
        self.photos.iter().map(|p| p.photo_ref.clone()).collect()
    }

    /// Move to `step` and mark it as prompted
    pub fn go_to(&mut self, step: DraftStep) {
        self.step = step;
        self.last_asked = Some(step);
    }

    /// Step that follows the one just answered
    fn advance(&mut self) {
        let target = if self.return_to_preview {
            self.return_to_preview = false;
            DraftStep::Preview
        } else {
            self.step.next()
        };
        self.go_to(target);
    }

    /// Store free text for the current text step
    ///
    /// Returns `false` (draft untouched) for blank input or a non-text step.
    pub fn apply_text(&mut self, text: &str) -> bool {
        let value = text.trim();
        if value.is_empty() || !self.step.is_text() {
            return false;
        }
        let value = Some(value.to_string());
        match self.step {
            DraftStep::Object => self.object = value,
            DraftStep::Floor => self.floor = value,
            DraftStep::Description => self.description = value,
            _ => return false,
        }
        self.advance();
        true
    }

    pub fn apply_category(&mut self, category: Category) -> bool {
        if self.step != DraftStep::Category {
            return false;
        }
        self.category = Some(category);
        self.advance();
        true
    }

    pub fn apply_severity(&mut self, severity: Severity) -> bool {
        if self.step != DraftStep::Severity {
            return false;
        }
        self.severity = Some(severity);
        self.advance();
        true
    }

    /// Jump back to a field from the preview, keeping everything collected
    pub fn edit(&mut self, step: DraftStep) {
        self.return_to_preview = true;
        self.go_to(step);
    }

    pub fn clear_photos(&mut self) {
        self.photos.clear();
        self.pending_group_id = None;
        self.last_photo_at = None;
        self.edit(DraftStep::Photo);
    }

    /// Convert into a creation request, `None` while a required field is missing
    pub fn to_new_defect(&self, created_by: &str) -> Option<NewDefect> {
        if self.step != DraftStep::Preview {
            return None;
        }
        Some(NewDefect {
            object: self.object.clone()?,
            floor: self.floor.clone(),
            category: self.category?,
            severity: self.severity?,
            description: self.description.clone(),
            created_by: created_by.to_string(),
            photos: self
                .photos
                .iter()
                .map(|p| NewPhoto {
                    photo_ref: p.photo_ref.clone(),
                    role: p.role,
                })
                .collect(),
        })
    }

    pub fn render_preview(&self) -> String {
        let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "—".to_string());
        format!(
            "Check the defect before saving:\n\
             Object: {}\n\
             Floor: {}\n\
             Category: {}\n\
             Severity: {}\n\
             Description: {}\n\
             Photos: {}",
            dash(&self.object),
            dash(&self.floor),
            self.category.map(|c| c.label()).unwrap_or("—"),
            self.severity.map(|s| s.label()).unwrap_or("—"),
            dash(&self.description),
            self.photos.len()
        )
    }
}

fn category_keyboard() -> Vec<Vec<Button>> {
    Category::ALL
        .chunks(2)
        .map(|row| {
            row.iter()
                .map(|c| Button::new(c.label(), &ButtonAction::Category(*c)))
                .collect()
        })
        .collect()
}

fn severity_keyboard() -> Vec<Vec<Button>> {
    vec![Severity::ALL
        .iter()
        .map(|s| Button::new(s.label(), &ButtonAction::Severity(*s)))
        .collect()]
}

fn preview_keyboard() -> Vec<Vec<Button>> {
    vec![
        vec![Button::new("Save", &ButtonAction::Save)],
        vec![
            Button::new("Edit", &ButtonAction::EditMenu),
            Button::new("Cancel", &ButtonAction::Cancel),
        ],
    ]
}

fn edit_menu_keyboard() -> Vec<Vec<Button>> {
    let edit = |label: &str, step| Button::new(label, &ButtonAction::EditStep(step));
    vec![
        vec![edit("Object", DraftStep::Object), edit("Floor", DraftStep::Floor)],
        vec![edit("Category", DraftStep::Category), edit("Severity", DraftStep::Severity)],
        vec![edit("Description", DraftStep::Description), edit("Photos", DraftStep::Photo)],
        vec![
            Button::new("Clear photos", &ButtonAction::ClearPhotos),
            Button::new("Back to preview", &ButtonAction::BackToPreview),
        ],
    ]
}

/// Message asking for whatever `draft.step` needs
pub fn prompt(recipient: &str, draft: &Draft, kind: MessageKind) -> OutboundMessage {
    let msg = |text: &str| OutboundMessage::new(recipient, kind.clone(), text);
    match draft.step {
        DraftStep::Photo => msg("Send photos of the defect. One or several, an album is fine."),
        DraftStep::Object => msg("Which object? (building, section, room)"),
        DraftStep::Floor => msg("Which floor?"),
        DraftStep::Category => msg("Choose a category:").with_keyboard(category_keyboard()),
        DraftStep::Severity => msg("Choose a severity:").with_keyboard(severity_keyboard()),
        DraftStep::Description => msg("Describe the defect."),
        DraftStep::Preview => OutboundMessage::new(recipient, kind.clone(), draft.render_preview())
            .with_keyboard(preview_keyboard())
            .with_photos(draft.photo_refs()),
    }
}

fn ask(recipient: &str, draft: &Draft) -> OutboundMessage {
    let kind = match draft.step {
        DraftStep::Preview => MessageKind::Preview,
        step => MessageKind::Ask(step),
    };
    prompt(recipient, draft, kind)
}

fn reprompt(recipient: &str, draft: &Draft) -> OutboundMessage {
    let mut message = prompt(recipient, draft, MessageKind::Reprompt(draft.step));
    if draft.step.is_text() {
        message.text = format!("An empty answer won't do. {}", message.text);
    }
    message
}

impl Engine {
    fn draft_key(actor: &str) -> StateKey {
        StateKey::new(actor, Purpose::Draft)
    }

    pub async fn load_draft(&self, actor: &str) -> Result<Option<Draft>> {
        ephemeral::load(self.ephemeral.as_ref(), &Self::draft_key(actor)).await
    }

    pub(crate) async fn save_draft(&self, actor: &str, draft: &Draft) -> Result<()> {
        ephemeral::save(
            self.ephemeral.as_ref(),
            &Self::draft_key(actor),
            draft,
            self.capture.draft_ttl(),
        )
        .await
    }

    /// Drop the draft and every pending debounce timer of `actor`
    pub(crate) async fn discard_draft(&self, actor: &str) -> Result<()> {
        self.debounce.cancel_actor(actor);
        self.ephemeral.clear(&Self::draft_key(actor)).await
    }

    /// `/new`: fresh draft waiting for photos
    pub(crate) async fn draft_start(&self, actor: &str) -> Result<Handled> {
        self.discard_draft(actor).await?;
        self.clear_after_mode(actor).await?;

        let mut draft = Draft::new();
        draft.last_asked = Some(DraftStep::Photo);
        self.save_draft(actor, &draft).await?;
        info!(actor = %actor, "Draft started");

        self.deliver(prompt(actor, &draft, MessageKind::AskPhoto)).await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn draft_photo(
        &self,
        actor: &str,
        photo_ref: &str,
        group_id: Option<&str>,
    ) -> Result<Handled> {
        let mut draft = match self.load_draft(actor).await? {
            Some(draft) => draft,
            None => {
                info!(actor = %actor, "Draft started by photo");
                Draft::new()
            }
        };

        let added = draft.add_photo(photo_ref, PhotoRole::Initial);
        draft.last_photo_at = Some(time::now());
        draft.pending_group_id = group_id.map(str::to_string);
        self.save_draft(actor, &draft).await?;

        trace!(actor = %actor, photo_ref = %photo_ref, added, total = draft.photos.len(), "Draft photo");

        if draft.step == DraftStep::Photo {
            match group_id {
                Some(group) => self.debounce.schedule_group(actor, group, self.capture.album_delay()),
                None => self.debounce.schedule_single(actor, self.capture.single_delay()),
            }
        }
        Ok(Handled::Consumed)
    }

    /// Advance past the photo step once a burst has settled
    pub(crate) async fn on_debounce_fired(&self, fired: DebounceFired) -> Result<()> {
        let actor = fired.actor.as_str();
        let Some(mut draft) = self.load_draft(actor).await? else {
            return Ok(());
        };

        if draft.step != DraftStep::Photo || draft.last_asked == Some(DraftStep::Object) {
            trace!(actor = %actor, step = draft.step.as_str(), "Debounce fired after draft moved on");
            return Ok(());
        }
        if draft.photos.is_empty() {
            return Ok(());
        }

        let quiet_ms = match fired.burst {
            BurstKind::Group(_) => self.capture.album_quiet_ms,
            BurstKind::Single => self.capture.single_quiet_ms,
        };
        if let Some(last) = draft.last_photo_at {
            let elapsed = (time::now() - last).num_milliseconds();
            if elapsed < quiet_ms as i64 {
                debug!(actor = %actor, elapsed, quiet_ms, "Burst not quiet yet");
                return Ok(());
            }
        }

        draft.advance();
        draft.pending_group_id = None;
        self.save_draft(actor, &draft).await?;
        debug!(actor = %actor, photos = draft.photos.len(), step = draft.step.as_str(), "Photo burst settled");

        self.deliver(ask(actor, &draft)).await;
        Ok(())
    }

    pub(crate) async fn draft_text(&self, actor: &str, mut draft: Draft, text: &str) -> Result<Handled> {
        if draft.apply_text(text) {
            self.save_draft(actor, &draft).await?;
            self.deliver(ask(actor, &draft)).await;
        } else {
            self.deliver(reprompt(actor, &draft)).await;
        }
        Ok(Handled::Consumed)
    }

    /// Draft-owned buttons; a button for a step the draft is not at is stale
    pub(crate) async fn draft_button(&self, actor: &str, action: ButtonAction) -> Result<Handled> {
        let Some(mut draft) = self.load_draft(actor).await? else {
            debug!(actor = %actor, action = %action, "Draft button without a draft");
            return Ok(Handled::Ignored);
        };

        match action {
            ButtonAction::Category(category) => {
                if !draft.apply_category(category) {
                    return Ok(Handled::Ignored);
                }
            }
            ButtonAction::Severity(severity) => {
                if !draft.apply_severity(severity) {
                    return Ok(Handled::Ignored);
                }
            }
            ButtonAction::UnknownOption(step) => {
                if draft.step != step {
                    return Ok(Handled::Ignored);
                }
                self.deliver(reprompt(actor, &draft)).await;
                return Ok(Handled::Consumed);
            }
            ButtonAction::EditMenu => {
                if draft.step != DraftStep::Preview {
                    return Ok(Handled::Ignored);
                }
                self.deliver(
                    OutboundMessage::new(actor, MessageKind::EditMenu, "What should be changed?")
                        .with_keyboard(edit_menu_keyboard()),
                )
                .await;
                return Ok(Handled::Consumed);
            }
            ButtonAction::EditStep(step) => {
                self.debounce.cancel_actor(actor);
                draft.edit(step);
            }
            ButtonAction::ClearPhotos => {
                self.debounce.cancel_actor(actor);
                draft.clear_photos();
            }
            ButtonAction::BackToPreview => {
                self.debounce.cancel_actor(actor);
                draft.return_to_preview = false;
                draft.go_to(DraftStep::Preview);
            }
            ButtonAction::Save => return self.draft_save(actor, draft).await,
            ButtonAction::Cancel => {
                self.discard_draft(actor).await?;
                info!(actor = %actor, "Draft cancelled");
                self.deliver(OutboundMessage::new(actor, MessageKind::DraftCancelled, "Draft cancelled."))
                    .await;
                return Ok(Handled::Consumed);
            }
            other => {
                return Err(Error::Internal(format!("not a draft action: {}", other)));
            }
        }

        self.save_draft(actor, &draft).await?;
        self.deliver(ask(actor, &draft)).await;
        Ok(Handled::Consumed)
    }

    async fn draft_save(&self, actor: &str, draft: Draft) -> Result<Handled> {
        let Some(new) = draft.to_new_defect(actor) else {
            self.deliver(OutboundMessage::new(
                actor,
                MessageKind::Rejected(FailureReason::DraftIncomplete),
                "The draft is not complete yet.",
            ))
            .await;
            return Ok(Handled::Consumed);
        };

        let defect = self.store.create_defect(&new).await?;
        self.discard_draft(actor).await?;

        self.publish(SnagEvent::DefectCreated {
            human_id: defect.human_id.clone(),
            created_by: defect.created_by.clone(),
            photo_count: new.photos.len(),
            timestamp: defect.created_at,
        });

        self.deliver(
            OutboundMessage::new(
                actor,
                MessageKind::DefectSaved,
                format!("Saved as #{}.", defect.human_id),
            )
            .with_keyboard(cards::card_keyboard(&defect.human_id)),
        )
        .await;
        Ok(Handled::Consumed)
    }
}
