//! Outbound messaging
//!
//! The engine never talks to a chat transport directly. It produces
//! [`OutboundMessage`] values and hands them to a [`Messenger`]; delivery
//! failures are logged and swallowed by the caller.

use crate::flows::draft::DraftStep;
use crate::flows::wizard::{ControlEffect, WizardStep};
use crate::inbound::ButtonAction;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use snag_common::{Error, FailureReason, Result};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

static NUMERIC_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("static regex"));

/// Machine-readable purpose of an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MessageKind {
    /// Waiting for the first photo of a new draft
    AskPhoto,
    /// Prompt for a draft field
    Ask(DraftStep),
    /// Previous input for a draft field was unusable
    Reprompt(DraftStep),
    Preview,
    EditMenu,
    DefectSaved,
    DraftCancelled,
    /// Every flow for the actor was reset
    Reset,
    /// Operation refused with a named reason
    Rejected(FailureReason),
    WizardPrompt(WizardStep),
    WizardReprompt(WizardStep),
    ControlApplied,
    ControlFailed {
        effect: ControlEffect,
        reason: FailureReason,
    },
    ControlCancelled,
    /// Sent to a newly assigned responsible party
    AssignmentNotice,
    /// Sent to the original reporter when their defect is put on control
    ReporterNotice,
    AfterModePrompt,
    AfterPhotoAdded,
    StatusChanged,
    DueChanged,
    Card,
    CardEditMenu,
    CardEditPrompt,
    FieldUpdated,
    ListsMenu,
    ListItem,
    ListEmpty,
    ListPage,
    OverdueReminder,
}

/// Inline button; `data` is the encoded [`ButtonAction`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: &ButtonAction) -> Self {
        Self {
            label: label.into(),
            data: action.encode(),
        }
    }

    pub fn action(&self) -> Option<ButtonAction> {
        ButtonAction::decode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// Actor identifier of the recipient
    pub recipient: String,
    #[serde(flatten)]
    pub kind: MessageKind,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keyboard: Vec<Vec<Button>>,
    /// Opaque photo references to send alongside the text
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,
}

impl OutboundMessage {
    pub fn new(recipient: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            kind,
            text: text.into(),
            keyboard: Vec::new(),
            photos: Vec::new(),
        }
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<Button>>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_photos(mut self, photos: Vec<String>) -> Self {
        self.photos = photos;
        self
    }

    /// Every button action on the keyboard, row by row
    pub fn actions(&self) -> Vec<ButtonAction> {
        self.keyboard
            .iter()
            .flatten()
            .filter_map(Button::action)
            .collect()
    }
}

/// Directly addressable recipient, if `id` is a numeric chat identifier
///
/// `@handle` assignees cannot be messaged without a lookup the core does
/// not have, so they are skipped for notifications.
pub fn numeric_recipient(id: &str) -> Option<&str> {
    let id = id.trim();
    NUMERIC_ID_RE.is_match(id).then_some(id)
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

/// Writes each message as one JSON line on stdout
pub struct ConsoleMessenger {
    out: Mutex<Stdout>,
}

impl ConsoleMessenger {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;
        out.flush().await.map_err(|e| Error::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_recipient() {
        assert_eq!(numeric_recipient("123456"), Some("123456"));
        assert_eq!(numeric_recipient(" 42 "), Some("42"));
        assert_eq!(numeric_recipient("@alice"), None);
        assert_eq!(numeric_recipient("12a"), None);
        assert_eq!(numeric_recipient(""), None);
    }

    #[test]
    fn test_message_serializes_kind_and_detail() {
        let msg = OutboundMessage::new("1", MessageKind::Reprompt(DraftStep::Floor), "Floor?");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "reprompt");
        assert_eq!(json["detail"], "floor");
        assert!(json.get("keyboard").is_none());

        let msg = OutboundMessage::new("1", MessageKind::Preview, "p")
            .with_keyboard(vec![vec![Button::new("Save", &ButtonAction::Save)]]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "preview");
        assert_eq!(json["keyboard"][0][0]["data"], "def_save");
        assert_eq!(msg.actions(), vec![ButtonAction::Save]);
    }
}
