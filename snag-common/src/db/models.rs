//! Database models
//!
//! Enumerations are stored as their snake_case names; the same names are
//! used in button payloads and audit records.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

static HUMAN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^A-Za-z0-9])#?(D-\d{6})\b").expect("static regex"));

/// Format a sequence number as a human-readable ID (`D-000042`)
pub fn format_human_id(seq: i64) -> String {
    format!("D-{:06}", seq)
}

/// Find a human-readable ID anywhere in free text (`#d-000042` → `D-000042`)
pub fn find_human_id(text: &str) -> Option<String> {
    HUMAN_ID_RE
        .captures(text)
        .map(|caps| caps[1].to_ascii_uppercase())
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Trade the defect belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Architecture,
    Structural,
    Electrical,
    Plumbing,
    Finishing,
    Landscaping,
}

string_enum!(Category {
    Architecture => "architecture",
    Structural => "structural",
    Electrical => "electrical",
    Plumbing => "plumbing",
    Finishing => "finishing",
    Landscaping => "landscaping",
});

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Architecture => "Architecture",
            Category::Structural => "Structural",
            Category::Electrical => "Electrical",
            Category::Plumbing => "Plumbing",
            Category::Finishing => "Finishing",
            Category::Landscaping => "Landscaping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Medium,
    Low,
}

string_enum!(Severity {
    Critical => "critical",
    Medium => "medium",
    Low => "low",
});

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Medium => "Medium",
            Severity::Low => "Minor",
        }
    }
}

/// Lifecycle status of a persisted defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    Discovered,
    OnControl,
    Fixed,
    /// Reserved; valid in storage but not entered by the conversational flows
    AwaitingReview,
}

string_enum!(DefectStatus {
    Discovered => "discovered",
    OnControl => "on_control",
    Fixed => "fixed",
    AwaitingReview => "awaiting_review",
});

impl DefectStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DefectStatus::Discovered => "Discovered",
            DefectStatus::OnControl => "On control",
            DefectStatus::Fixed => "Fixed",
            DefectStatus::AwaitingReview => "Awaiting review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoRole {
    Initial,
    Before,
    After,
    Generic,
}

string_enum!(PhotoRole {
    Initial => "initial",
    Before => "before",
    After => "after",
    Generic => "generic",
});

/// Kind column of `defect_actions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    StatusChange,
    Assign,
    AssignClear,
    AddPhoto,
    DueChange,
    NotifyOverdue,
    Update,
}

string_enum!(ActionKind {
    Create => "create",
    StatusChange => "status_change",
    Assign => "assign",
    AssignClear => "assign_clear",
    AddPhoto => "add_photo",
    DueChange => "due_change",
    NotifyOverdue => "notify_overdue",
    Update => "update",
});

/// Free-text fields of a persisted defect that may be corrected after save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    Object,
    Floor,
    Description,
}

string_enum!(EditableField {
    Object => "object",
    Floor => "floor",
    Description => "description",
});

impl EditableField {
    pub fn column(&self) -> &'static str {
        self.as_str()
    }
}

/// Structured audit payload, one shape per action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionPayload {
    Create {
        status: DefectStatus,
        category: Category,
        severity: Severity,
    },
    StatusChange {
        from: DefectStatus,
        to: DefectStatus,
    },
    Assign {
        to: String,
    },
    AssignClear {
        from: Option<String>,
    },
    AddPhoto {
        role: PhotoRole,
        count: usize,
    },
    DueChange {
        due: DateTime<Utc>,
    },
    NotifyOverdue {
        recipients: Vec<String>,
        due: Option<DateTime<Utc>>,
    },
    Update {
        field: EditableField,
        from: Option<String>,
        to: String,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Create { .. } => ActionKind::Create,
            ActionPayload::StatusChange { .. } => ActionKind::StatusChange,
            ActionPayload::Assign { .. } => ActionKind::Assign,
            ActionPayload::AssignClear { .. } => ActionKind::AssignClear,
            ActionPayload::AddPhoto { .. } => ActionKind::AddPhoto,
            ActionPayload::DueChange { .. } => ActionKind::DueChange,
            ActionPayload::NotifyOverdue { .. } => ActionKind::NotifyOverdue,
            ActionPayload::Update { .. } => ActionKind::Update,
        }
    }
}

/// Persisted defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub id: String,
    pub human_id: String,
    pub object: String,
    pub floor: Option<String>,
    pub category: Category,
    pub severity: Severity,
    pub description: Option<String>,
    pub status: DefectStatus,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectPhoto {
    pub defect_id: String,
    pub role: PhotoRole,
    pub photo_ref: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectAction {
    pub seq: i64,
    pub defect_id: String,
    pub actor_id: String,
    pub payload: ActionPayload,
    pub created_at: DateTime<Utc>,
}

impl DefectAction {
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

/// Photo counts shown on a defect card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhotoCounts {
    pub initial: i64,
    pub after: i64,
}
