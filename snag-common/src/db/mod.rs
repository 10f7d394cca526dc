//! Database schema and durable data model

pub mod init;
pub mod models;

pub use init::*;
pub use models::*;
