//! Control wizard: responsible party, due date, then `on_control`
//!
//! Finalization applies its three effects in order and stops at the first
//! failure. Effects already applied stay applied; the wizard state is kept so
//! the actor can retry or cancel.

use crate::engine::{Engine, Handled};
use crate::ephemeral::{self, Purpose, StateKey};
use crate::flows::cards;
use crate::inbound::{ButtonAction, DueChoice};
use crate::messaging::{numeric_recipient, Button, MessageKind, OutboundMessage};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snag_common::db::DefectStatus;
use snag_common::events::SnagEvent;
use snag_common::{time, Error, FailureReason, Result};
use tracing::{info, warn};

static ASSIGNEE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:@[A-Za-z0-9_]{1,64}|\d+)$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    AskAssignee,
    WaitAssigneeInput,
    AskDue,
    WaitDueInput,
}

/// Finalization effect that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEffect {
    Assign,
    DueDate,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlWizardState {
    pub human_id: String,
    pub step: WizardStep,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Only move the due date; started from "custom date" outside the wizard
    #[serde(default)]
    pub reschedule_only: bool,
}

impl ControlWizardState {
    pub fn new(human_id: &str) -> Self {
        Self {
            human_id: human_id.to_string(),
            step: WizardStep::AskAssignee,
            assigned_to: None,
            reschedule_only: false,
        }
    }
}

/// Accept `@handle` or a numeric identifier
pub fn parse_assignee(text: &str) -> Option<String> {
    let text = text.trim();
    ASSIGNEE_RE.is_match(text).then(|| text.to_string())
}

fn assignee_keyboard(human_id: &str) -> Vec<Vec<Button>> {
    let id = || human_id.to_string();
    vec![
        vec![Button::new("Me", &ButtonAction::AssignMe(id()))],
        vec![Button::new("Enter manually", &ButtonAction::AssignEnter(id()))],
        vec![Button::new("Cancel", &ButtonAction::ControlCancel(id()))],
    ]
}

fn due_keyboard(human_id: &str) -> Vec<Vec<Button>> {
    let id = || human_id.to_string();
    vec![
        vec![
            Button::new("Today", &ButtonAction::Due(DueChoice::Today, id())),
            Button::new("+1 day", &ButtonAction::Due(DueChoice::PlusOne, id())),
            Button::new("+3 days", &ButtonAction::Due(DueChoice::PlusThree, id())),
        ],
        vec![Button::new("Custom date", &ButtonAction::DueCustom(id()))],
        vec![Button::new("Cancel", &ButtonAction::ControlCancel(id()))],
    ]
}

fn step_prompt(actor: &str, state: &ControlWizardState, kind: MessageKind) -> OutboundMessage {
    let id = &state.human_id;
    match state.step {
        WizardStep::AskAssignee => OutboundMessage::new(
            actor,
            kind,
            format!("Who is responsible for #{}? Choose or send @username or a numeric ID.", id),
        )
        .with_keyboard(assignee_keyboard(id)),
        WizardStep::WaitAssigneeInput => {
            OutboundMessage::new(actor, kind, "Send @username or a numeric ID.")
        }
        WizardStep::AskDue => OutboundMessage::new(actor, kind, format!("Due date for #{}?", id))
            .with_keyboard(due_keyboard(id)),
        WizardStep::WaitDueInput => {
            OutboundMessage::new(actor, kind, "Send the date as DD.MM.YYYY, e.g. 28.09.2025.")
        }
    }
}

impl Engine {
    fn wizard_key(actor: &str) -> StateKey {
        StateKey::new(actor, Purpose::ControlWizard)
    }

    pub async fn load_wizard(&self, actor: &str) -> Result<Option<ControlWizardState>> {
        ephemeral::load(self.ephemeral.as_ref(), &Self::wizard_key(actor)).await
    }

    async fn save_wizard(&self, actor: &str, state: &ControlWizardState) -> Result<()> {
        ephemeral::save(
            self.ephemeral.as_ref(),
            &Self::wizard_key(actor),
            state,
            self.control.wizard_ttl(),
        )
        .await
    }

    pub(crate) async fn clear_wizard(&self, actor: &str) -> Result<()> {
        self.ephemeral.clear(&Self::wizard_key(actor)).await
    }

    async fn wizard_advance(&self, actor: &str, state: &ControlWizardState) -> Result<Handled> {
        self.save_wizard(actor, state).await?;
        self.deliver(step_prompt(actor, state, MessageKind::WizardPrompt(state.step)))
            .await;
        Ok(Handled::Consumed)
    }

    /// "Put on control" pressed on a card
    pub(crate) async fn wizard_start(&self, actor: &str, human_id: &str) -> Result<Handled> {
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

        info!(actor = %actor, human_id = %human_id, "Control wizard started");
        self.wizard_advance(actor, &ControlWizardState::new(human_id)).await
    }

    pub(crate) async fn wizard_assign_me(&self, actor: &str, human_id: &str) -> Result<Handled> {
        let mut state = ControlWizardState::new(human_id);
        state.assigned_to = Some(actor.to_string());
        state.step = WizardStep::AskDue;
        self.wizard_advance(actor, &state).await
    }

    pub(crate) async fn wizard_assign_enter(&self, actor: &str, human_id: &str) -> Result<Handled> {
        let mut state = ControlWizardState::new(human_id);
        state.step = WizardStep::WaitAssigneeInput;
        self.wizard_advance(actor, &state).await
    }

    pub(crate) async fn wizard_cancel(&self, actor: &str) -> Result<Handled> {
        self.clear_wizard(actor).await?;
        self.deliver(OutboundMessage::new(actor, MessageKind::ControlCancelled, "Cancelled."))
            .await;
        Ok(Handled::Consumed)
    }

    pub(crate) async fn wizard_text(
        &self,
        actor: &str,
        mut state: ControlWizardState,
        text: &str,
    ) -> Result<Handled> {
        match state.step {
            WizardStep::AskAssignee | WizardStep::WaitAssigneeInput => match parse_assignee(text) {
                Some(assignee) => {
                    state.assigned_to = Some(assignee);
                    state.step = WizardStep::AskDue;
                    self.wizard_advance(actor, &state).await
                }
                None => {
                    state.step = WizardStep::WaitAssigneeInput;
                    self.save_wizard(actor, &state).await?;
                    self.deliver(step_prompt(actor, &state, MessageKind::WizardReprompt(state.step)))
                        .await;
                    Ok(Handled::Consumed)
                }
            },
            WizardStep::AskDue | WizardStep::WaitDueInput => {
                match time::parse_due_date(text, self.control.utc_offset_minutes) {
                    Some(due) => self.wizard_finalize(actor, state, due).await,
                    None => {
                        state.step = WizardStep::WaitDueInput;
                        self.save_wizard(actor, &state).await?;
                        self.deliver(step_prompt(actor, &state, MessageKind::WizardReprompt(state.step)))
                            .await;
                        Ok(Handled::Consumed)
                    }
                }
            }
        }
    }

    /// Quick due button: finishes the wizard for this defect, or reschedules directly
    pub(crate) async fn wizard_due(&self, actor: &str, choice: DueChoice, human_id: &str) -> Result<Handled> {
        let due = time::due_in_days(&time::now(), choice.days(), self.control.utc_offset_minutes);
        match self.load_wizard(actor).await? {
            Some(state) if state.human_id == human_id => self.wizard_finalize(actor, state, due).await,
            _ => self.reschedule(actor, human_id, due).await,
        }
    }

    pub(crate) async fn wizard_due_custom(&self, actor: &str, human_id: &str) -> Result<Handled> {
        let state = match self.load_wizard(actor).await? {
            Some(mut state) if state.human_id == human_id => {
                state.step = WizardStep::WaitDueInput;
                state
            }
            _ => ControlWizardState {
                human_id: human_id.to_string(),
                step: WizardStep::WaitDueInput,
                assigned_to: None,
                reschedule_only: true,
            },
        };
        self.wizard_advance(actor, &state).await
    }

    /// Move the due date alone
    async fn reschedule(&self, actor: &str, human_id: &str, due: DateTime<Utc>) -> Result<Handled> {
        let defect = match self.store.set_due_date(human_id, due, actor).await {
            Ok(defect) => defect,
            Err(Error::Rejected(reason)) => {
                self.reply_rejected(actor, human_id, reason).await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        };

        self.publish(SnagEvent::DueChanged {
            human_id: defect.human_id.clone(),
            due_date: due,
            timestamp: defect.updated_at,
        });
        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::DueChanged,
            format!(
                "#{}: due date moved to {}.",
                human_id,
                time::format_date(&due, self.control.utc_offset_minutes)
            ),
        ))
        .await;
        Ok(Handled::Consumed)
    }

    async fn report_effect_failure(
        &self,
        actor: &str,
        human_id: &str,
        effect: ControlEffect,
        reason: FailureReason,
    ) {
        let text = match effect {
            ControlEffect::Assign => format!("Could not assign #{} ({}).", human_id, reason),
            ControlEffect::DueDate => format!(
                "Responsible party saved, but the due date of #{} could not be set ({}).",
                human_id, reason
            ),
            ControlEffect::Status => format!(
                "Responsible party and due date saved, but #{} could not be put on control ({}).",
                human_id, reason
            ),
        };
        warn!(actor = %actor, human_id = %human_id, effect = ?effect, reason = %reason, "Control effect failed");
        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::ControlFailed { effect, reason },
            text,
        ))
        .await;
    }

    async fn wizard_finalize(
        &self,
        actor: &str,
        state: ControlWizardState,
        due: DateTime<Utc>,
    ) -> Result<Handled> {
        let human_id = state.human_id.as_str();

        if state.reschedule_only {
            self.clear_wizard(actor).await?;
            return self.reschedule(actor, human_id, due).await;
        }

        let Some(assignee) = state.assigned_to.clone() else {
            self.clear_wizard(actor).await?;
            self.reply_rejected(actor, human_id, FailureReason::MissingAssignee)
                .await;
            return Ok(Handled::Consumed);
        };

        let assigned = match self.store.assign(human_id, &assignee, actor).await {
            Ok(defect) => defect,
            Err(Error::Rejected(reason)) => {
                self.report_effect_failure(actor, human_id, ControlEffect::Assign, reason)
                    .await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        };
        self.publish(SnagEvent::Assigned {
            human_id: human_id.to_string(),
            assigned_to: assignee.clone(),
            timestamp: assigned.updated_at,
        });

        let scheduled = match self.store.set_due_date(human_id, due, actor).await {
            Ok(defect) => defect,
            Err(Error::Rejected(reason)) => {
                self.report_effect_failure(actor, human_id, ControlEffect::DueDate, reason)
                    .await;
                return Ok(Handled::Consumed);
            }
            Err(e) => return Err(e),
        };
        self.publish(SnagEvent::DueChanged {
            human_id: human_id.to_string(),
            due_date: due,
            timestamp: scheduled.updated_at,
        });

        let defect = if scheduled.status == DefectStatus::OnControl {
            scheduled
        } else {
            match self.store.transition(human_id, DefectStatus::OnControl, actor).await {
                Ok(transition) => {
                    self.publish(SnagEvent::StatusChanged {
                        human_id: human_id.to_string(),
                        from: transition.from,
                        to: DefectStatus::OnControl,
                        actor: actor.to_string(),
                        timestamp: transition.defect.updated_at,
                    });
                    transition.defect
                }
                Err(Error::Rejected(reason)) => {
                    self.report_effect_failure(actor, human_id, ControlEffect::Status, reason)
                        .await;
                    return Ok(Handled::Consumed);
                }
                Err(e) => return Err(e),
            }
        };

        self.clear_wizard(actor).await?;
        info!(actor = %actor, human_id = %human_id, assignee = %assignee, "Defect put on control");

        let due_text = time::format_date(&due, self.control.utc_offset_minutes);
        self.deliver(OutboundMessage::new(
            actor,
            MessageKind::ControlApplied,
            format!(
                "#{} is on control.\nResponsible: {}\nDue: {}",
                human_id, assignee, due_text
            ),
        ))
        .await;

        if let Some(recipient) = numeric_recipient(&assignee).filter(|r| *r != actor) {
            self.deliver(
                OutboundMessage::new(
                    recipient,
                    MessageKind::AssignmentNotice,
                    format!("You are responsible for #{}. Due: {}", human_id, due_text),
                )
                .with_keyboard(cards::card_keyboard(human_id)),
            )
            .await;
        }

        let reporter = defect.created_by.as_str();
        if reporter != actor && reporter != assignee {
            if let Some(recipient) = numeric_recipient(reporter) {
                self.deliver(OutboundMessage::new(
                    recipient,
                    MessageKind::ReporterNotice,
                    format!(
                        "Your defect #{} is on control. Responsible: {}. Due: {}",
                        human_id, assignee, due_text
                    ),
                ))
                .await;
            }
        }

        self.show_card(actor, human_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignee() {
        assert_eq!(parse_assignee("@alice").as_deref(), Some("@alice"));
        assert_eq!(parse_assignee(" 123456 ").as_deref(), Some("123456"));
        assert_eq!(parse_assignee("alice"), None);
        assert_eq!(parse_assignee("@"), None);
        assert_eq!(parse_assignee("@al ice"), None);
        assert_eq!(parse_assignee(""), None);
    }

    #[test]
    fn test_state_roundtrips_with_defaults() {
        let state: ControlWizardState =
            serde_json::from_str(r#"{"human_id":"D-000001","step":"ask_due"}"#).unwrap();
        assert_eq!(state.step, WizardStep::AskDue);
        assert!(state.assigned_to.is_none());
        assert!(!state.reschedule_only);
    }

    #[test]
    fn test_step_prompts_carry_buttons() {
        let state = ControlWizardState::new("D-000001");
        let msg = step_prompt("1", &state, MessageKind::WizardPrompt(state.step));
        assert!(msg.actions().contains(&ButtonAction::AssignMe("D-000001".into())));
    }
}
