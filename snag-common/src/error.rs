//! Common error types for the defect tracker

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common result type for defect tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable reason attached to a refused operation
///
/// Callers match on these to prompt a specific corrective action
/// (e.g. ask for an "after" photo) instead of showing a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Human-readable ID does not resolve to a defect
    NotFound,
    /// Closing requires at least one photo with role `after`
    NoAfterPhotos,
    /// Transition not permitted from the current status
    InvalidTransition,
    /// Control wizard reached finalize without a responsible party
    MissingAssignee,
    /// Draft is missing a required field at save time
    DraftIncomplete,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "not_found",
            FailureReason::NoAfterPhotos => "no_after_photos",
            FailureReason::InvalidTransition => "invalid_transition",
            FailureReason::MissingAssignee => "missing_assignee",
            FailureReason::DraftIncomplete => "draft_incomplete",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error types across the defect tracker
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding/decoding of ephemeral state or audit payloads
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation refused with a named reason
    #[error("Rejected: {0}")]
    Rejected(FailureReason),

    /// Outbound message could not be delivered
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Named reason if this error is a refusal, `None` for faults
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Error::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}
