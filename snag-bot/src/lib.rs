//! # Snag Bot (snag-bot)
//!
//! Conversational core of the defect tracker.
//!
//! **Purpose:** Assemble defect reports from bursty photo/text/button input,
//! drive defects through their lifecycle, run the control wizard and send
//! overdue reminders.
//!
//! **Architecture:** Transport-agnostic. Events come in as [`inbound::InboundEvent`],
//! replies go out through a [`messaging::Messenger`]; per-actor state lives in an
//! [`ephemeral::EphemeralStore`] and durable records in [`db::DefectStore`].

pub mod actor_queue;
pub mod db;
pub mod debounce;
pub mod engine;
pub mod ephemeral;
pub mod flows;
pub mod inbound;
pub mod lifecycle;
pub mod messaging;
pub mod reminders;

pub use engine::{Engine, Handled};
