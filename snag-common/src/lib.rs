//! # Snag Common Library
//!
//! Shared code for the defect tracker:
//! - Error type and machine-readable failure reasons
//! - Configuration loading
//! - Database initialization and the durable data model
//! - Event types (SnagEvent enum)
//! - Timestamp and due-date helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, FailureReason, Result};
