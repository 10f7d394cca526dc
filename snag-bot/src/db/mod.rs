//! Durable defect persistence

pub mod defects;

pub use defects::*;
