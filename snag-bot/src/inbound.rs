//! Inbound events and the button-payload codec
//!
//! Transports normalize whatever they receive into [`InboundEvent`]: a photo,
//! a text message or a button press. Button payloads are compact
//! `prefix:arg[:arg]` strings, see [`ButtonAction`].

use crate::flows::draft::DraftStep;
use serde::{Deserialize, Serialize};
use snag_common::db::{find_human_id, Category, DefectStatus, EditableField, Severity};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Identifier of the sending actor
    pub actor: String,
    #[serde(flatten)]
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    Photo {
        /// Opaque external reference to the image
        photo_ref: String,
        /// Shared by photos delivered as one album
        #[serde(default)]
        group_id: Option<String>,
        #[serde(default)]
        caption: Option<String>,
    },
    Text {
        text: String,
    },
    Button {
        /// One-time identifier of this press
        callback_id: String,
        data: String,
    },
}

impl InboundEvent {
    pub fn photo(actor: &str, photo_ref: &str, group_id: Option<&str>) -> Self {
        Self {
            actor: actor.to_string(),
            kind: InboundKind::Photo {
                photo_ref: photo_ref.to_string(),
                group_id: group_id.map(str::to_string),
                caption: None,
            },
        }
    }

    pub fn text(actor: &str, text: &str) -> Self {
        Self {
            actor: actor.to_string(),
            kind: InboundKind::Text {
                text: text.to_string(),
            },
        }
    }

    pub fn button(actor: &str, callback_id: &str, action: &ButtonAction) -> Self {
        Self {
            actor: actor.to_string(),
            kind: InboundKind::Button {
                callback_id: callback_id.to_string(),
                data: action.encode(),
            },
        }
    }

    pub fn with_caption(mut self, text: &str) -> Self {
        if let InboundKind::Photo { caption, .. } = &mut self.kind {
            *caption = Some(text.to_string());
        }
        self
    }
}

/// Slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start an empty draft
    New,
    /// Abandon the current draft and every other flow
    Cancel,
    Reset,
    My(ListKind),
    Overdue,
    OnControl,
    /// Not handled by the core
    Other(String),
}

impl Command {
    /// Parse `/name[@bot] [args]`, `None` when `text` is not a command
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let arg = parts.next().map(str::to_lowercase);

        let command = match name.as_str() {
            "new" => Command::New,
            "cancel" => Command::Cancel,
            "def_reset" => Command::Reset,
            "my" => Command::My(match arg.as_deref() {
                Some("today") => ListKind::Today,
                Some("overdue") => ListKind::Overdue,
                Some("future") => ListKind::Future,
                _ => ListKind::All,
            }),
            "my_today" => Command::My(ListKind::Today),
            "my_overdue" => Command::My(ListKind::Overdue),
            "my_future" => Command::My(ListKind::Future),
            "overdue" => Command::Overdue,
            "oncontrol" => Command::OnControl,
            other => Command::Other(other.to_string()),
        };
        Some(command)
    }
}

/// Which defect list to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// Mine, due by the end of today
    Today,
    /// Mine, past due
    Overdue,
    /// On control, due after today
    Future,
    /// Mine, everything on control
    All,
    /// Everyone's, past due
    OverdueAll,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Today => "today",
            ListKind::Overdue => "overdue",
            ListKind::Future => "future",
            ListKind::All => "all",
            ListKind::OverdueAll => "overdue_all",
        }
    }
}

impl FromStr for ListKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(ListKind::Today),
            "overdue" => Ok(ListKind::Overdue),
            "future" => Ok(ListKind::Future),
            "all" => Ok(ListKind::All),
            "overdue_all" => Ok(ListKind::OverdueAll),
            _ => Err(()),
        }
    }
}

/// Quick due-date choices, in days from today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DueChoice {
    Today,
    PlusOne,
    PlusThree,
}

impl DueChoice {
    pub fn days(&self) -> i64 {
        match self {
            DueChoice::Today => 0,
            DueChoice::PlusOne => 1,
            DueChoice::PlusThree => 3,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            DueChoice::Today => "def_due_today",
            DueChoice::PlusOne => "def_due_p1",
            DueChoice::PlusThree => "def_due_p3",
        }
    }
}

/// Decoded button payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    // Draft assembly
    Category(Category),
    Severity(Severity),
    /// Selection button whose value is not in the option set
    UnknownOption(DraftStep),
    EditMenu,
    EditStep(DraftStep),
    ClearPhotos,
    BackToPreview,
    Save,
    Cancel,

    // Persisted defects
    Open(String),
    AddAfter(String),
    SetStatus(DefectStatus, String),
    SetFixed(String),
    CardEditMenu(String),
    CardEditField(EditableField, String),

    // Control wizard
    ControlMenu(String),
    AssignMe(String),
    AssignEnter(String),
    ControlCancel(String),
    Due(DueChoice, String),
    DueCustom(String),

    // Lists
    ListsMenu,
    List(ListKind, u32),
}

impl ButtonAction {
    pub fn encode(&self) -> String {
        match self {
            ButtonAction::Category(c) => format!("def_cat:{}", c),
            ButtonAction::Severity(s) => format!("def_sev:{}", s),
            ButtonAction::UnknownOption(DraftStep::Severity) => "def_sev:?".to_string(),
            ButtonAction::UnknownOption(_) => "def_cat:?".to_string(),
            ButtonAction::EditMenu => "def_edit_menu".to_string(),
            ButtonAction::EditStep(step) => format!("def_edit:{}", step.edit_target()),
            ButtonAction::ClearPhotos => "def_photos_clear".to_string(),
            ButtonAction::BackToPreview => "def_preview_back".to_string(),
            ButtonAction::Save => "def_save".to_string(),
            ButtonAction::Cancel => "def_cancel".to_string(),
            ButtonAction::Open(id) => format!("def_open:{}", id),
            ButtonAction::AddAfter(id) => format!("def_after:{}", id),
            ButtonAction::SetStatus(status, id) => format!("def_status:{}:{}", status, id),
            ButtonAction::SetFixed(id) => format!("def_set_fixed:{}", id),
            ButtonAction::CardEditMenu(id) => format!("def_edit_def:{}", id),
            ButtonAction::CardEditField(field, id) => format!("def_edit_field:{}:{}", field, id),
            ButtonAction::ControlMenu(id) => format!("def_ctl_menu:{}", id),
            ButtonAction::AssignMe(id) => format!("def_assign_me:{}", id),
            ButtonAction::AssignEnter(id) => format!("def_assign_enter:{}", id),
            ButtonAction::ControlCancel(id) => format!("def_ctl_cancel:{}", id),
            ButtonAction::Due(choice, id) => format!("{}:{}", choice.prefix(), id),
            ButtonAction::DueCustom(id) => format!("def_due_custom:{}", id),
            ButtonAction::ListsMenu => "lists_menu".to_string(),
            ButtonAction::List(kind, page) => format!("list:{}:{}", kind.as_str(), page),
        }
    }

    /// Decode a payload, `None` for anything the core does not own
    pub fn decode(data: &str) -> Option<ButtonAction> {
        let mut parts = data.split(':');
        let prefix = parts.next()?;
        let args: Vec<&str> = parts.collect();

        // Trailing human-readable ID argument, normalized
        let id_at = |i: usize| args.get(i).and_then(|raw| find_human_id(raw));

        let action = match (prefix, args.len()) {
            ("def_cat", 1) => match args[0].parse::<Category>() {
                Ok(c) => ButtonAction::Category(c),
                Err(_) => ButtonAction::UnknownOption(DraftStep::Category),
            },
            ("def_sev", 1) => match args[0].parse::<Severity>() {
                Ok(s) => ButtonAction::Severity(s),
                Err(_) => ButtonAction::UnknownOption(DraftStep::Severity),
            },
            ("def_edit_menu", 0) => ButtonAction::EditMenu,
            ("def_edit", 1) => ButtonAction::EditStep(DraftStep::from_edit_target(args[0])?),
            ("def_photos_clear", 0) => ButtonAction::ClearPhotos,
            ("def_preview_back", 0) => ButtonAction::BackToPreview,
            ("def_save", 0) => ButtonAction::Save,
            ("def_cancel", 0) => ButtonAction::Cancel,
            ("def_open", 1) => ButtonAction::Open(id_at(0)?),
            ("def_after", 1) => ButtonAction::AddAfter(id_at(0)?),
            ("def_status", 2) => ButtonAction::SetStatus(args[0].parse().ok()?, id_at(1)?),
            ("def_set_fixed", 1) => ButtonAction::SetFixed(id_at(0)?),
            ("def_edit_def", 1) => ButtonAction::CardEditMenu(id_at(0)?),
            ("def_edit_field", 2) => ButtonAction::CardEditField(args[0].parse().ok()?, id_at(1)?),
            ("def_ctl_menu", 1) => ButtonAction::ControlMenu(id_at(0)?),
            ("def_assign_me" | "def_ctl_me", 1) => ButtonAction::AssignMe(id_at(0)?),
            ("def_assign_enter" | "def_ctl_enter", 1) => ButtonAction::AssignEnter(id_at(0)?),
            ("def_ctl_cancel", 1) => ButtonAction::ControlCancel(id_at(0)?),
            ("def_due_today", 1) => ButtonAction::Due(DueChoice::Today, id_at(0)?),
            ("def_due_p1", 1) => ButtonAction::Due(DueChoice::PlusOne, id_at(0)?),
            ("def_due_p3", 1) => ButtonAction::Due(DueChoice::PlusThree, id_at(0)?),
            ("def_due_custom", 1) => ButtonAction::DueCustom(id_at(0)?),
            ("lists_menu", 0) => ButtonAction::ListsMenu,
            ("list", 2) => ButtonAction::List(args[0].parse().ok()?, args[1].parse().ok()?),
            _ => return None,
        };
        Some(action)
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_source_payloads() {
        assert_eq!(
            ButtonAction::decode("def_cat:plumbing"),
            Some(ButtonAction::Category(Category::Plumbing))
        );
        assert_eq!(
            ButtonAction::decode("def_ctl_me:D-000001"),
            Some(ButtonAction::AssignMe("D-000001".into()))
        );
        assert_eq!(
            ButtonAction::decode("def_status:fixed:d-000007"),
            Some(ButtonAction::SetStatus(DefectStatus::Fixed, "D-000007".into()))
        );
        assert_eq!(
            ButtonAction::decode("list:overdue:2"),
            Some(ButtonAction::List(ListKind::Overdue, 2))
        );
        assert_eq!(
            ButtonAction::decode("def_edit_field:floor:D-000010"),
            Some(ButtonAction::CardEditField(EditableField::Floor, "D-000010".into()))
        );
    }

    #[test]
    fn test_unknown_selection_is_distinguished_from_foreign_payload() {
        assert_eq!(
            ButtonAction::decode("def_cat:roofing"),
            Some(ButtonAction::UnknownOption(DraftStep::Category))
        );
        assert_eq!(
            ButtonAction::decode("def_sev:extreme"),
            Some(ButtonAction::UnknownOption(DraftStep::Severity))
        );
        assert_eq!(ButtonAction::decode("buy_pack_10"), None);
        assert_eq!(ButtonAction::decode("def_open:not-an-id"), None);
        assert_eq!(ButtonAction::decode("list:weekly:0"), None);
    }

    #[test]
    fn test_encoded_actions_decode_back() {
        let actions = [
            ButtonAction::Save,
            ButtonAction::EditStep(DraftStep::Photo),
            ButtonAction::EditStep(DraftStep::Description),
            ButtonAction::Due(DueChoice::PlusThree, "D-000042".into()),
            ButtonAction::CardEditMenu("D-000042".into()),
            ButtonAction::List(ListKind::OverdueAll, 0),
        ];
        for action in actions {
            assert_eq!(ButtonAction::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/new"), Some(Command::New));
        assert_eq!(Command::parse("/my overdue"), Some(Command::My(ListKind::Overdue)));
        assert_eq!(Command::parse("/my@snagbot"), Some(Command::My(ListKind::All)));
        assert_eq!(Command::parse("/def_reset"), Some(Command::Reset));
        assert_eq!(Command::parse("/start"), Some(Command::Other("start".into())));
        assert_eq!(Command::parse("Block A"), None);
    }

    #[test]
    fn test_inbound_event_json_shape() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"actor":"100","type":"photo","photo_ref":"f1","group_id":"g7"}"#,
        )
        .unwrap();
        assert_eq!(event, InboundEvent::photo("100", "f1", Some("g7")));

        let event: InboundEvent =
            serde_json::from_str(r#"{"actor":"100","type":"button","callback_id":"c1","data":"def_save"}"#)
                .unwrap();
        assert!(matches!(event.kind, InboundKind::Button { ref data, .. } if data == "def_save"));
    }
}
