//! Conversational flows
//!
//! Each flow adds its handlers to [`crate::engine::Engine`] and keeps its own
//! ephemeral state under a separate purpose, so flows can interleave.

pub mod after_mode;
pub mod cards;
pub mod draft;
pub mod lists;
pub mod wizard;
