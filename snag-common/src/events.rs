//! Event types for the defect event stream
//!
//! Published by the engine after each committed mutation so that other
//! collaborators (dashboards, report builders) can follow along without
//! polling the database.

use crate::db::models::{DefectStatus, PhotoRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defect tracker event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SnagEvent {
    /// Draft saved as a new defect
    DefectCreated {
        human_id: String,
        created_by: String,
        photo_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Lifecycle transition committed
    StatusChanged {
        human_id: String,
        from: DefectStatus,
        to: DefectStatus,
        actor: String,
        timestamp: DateTime<Utc>,
    },

    /// Responsible party set
    Assigned {
        human_id: String,
        assigned_to: String,
        timestamp: DateTime<Utc>,
    },

    /// Due date set or moved
    DueChanged {
        human_id: String,
        due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Photos attached to an existing defect
    PhotosAdded {
        human_id: String,
        role: PhotoRole,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Overdue reminder claimed and dispatched
    OverdueReminded {
        human_id: String,
        recipients: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SnagEvent {
    /// Human-readable ID of the defect this event concerns
    pub fn human_id(&self) -> &str {
        match self {
            SnagEvent::DefectCreated { human_id, .. }
            | SnagEvent::StatusChanged { human_id, .. }
            | SnagEvent::Assigned { human_id, .. }
            | SnagEvent::DueChanged { human_id, .. }
            | SnagEvent::PhotosAdded { human_id, .. }
            | SnagEvent::OverdueReminded { human_id, .. } => human_id,
        }
    }
}
