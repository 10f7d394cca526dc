//! Test helper modules for snag-bot integration tests
//!
//! Provides reusable test infrastructure components:
//! - In-memory and on-disk database and engine construction
//! - RecordingMessenger: captures outbound messages for assertions
//! - Polling helpers for timer-driven behaviour

#![allow(dead_code)]

pub mod messenger;

pub use messenger::RecordingMessenger;

use snag_bot::db::{DefectStore, NewDefect, NewPhoto};
use snag_bot::ephemeral::MemoryEphemeralStore;
use snag_bot::Engine;
use snag_common::config::TomlConfig;
use snag_common::db::{init_database, init_schema, Category, Defect, PhotoRole, Severity};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// In-memory database with the full schema
///
/// One connection only: every `sqlite::memory:` connection is its own database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

/// On-disk database with the production pool settings (WAL, several connections)
pub async fn file_pool(dir: &TempDir) -> SqlitePool {
    init_database(&dir.path().join("snag.db")).await.unwrap()
}

/// Defaults with short debounce windows
pub fn fast_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.capture.album_delay_ms = 250;
    config.capture.album_quiet_ms = 200;
    config.capture.single_delay_ms = 120;
    config.capture.single_quiet_ms = 100;
    config
}

pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub messenger: Arc<RecordingMessenger>,
    pub store: DefectStore,
}

pub async fn engine_with(config: &TomlConfig) -> TestEngine {
    let store = DefectStore::new(memory_pool().await);
    let messenger = Arc::new(RecordingMessenger::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(MemoryEphemeralStore::new()),
        messenger.clone(),
        config,
    );
    TestEngine {
        engine,
        messenger,
        store,
    }
}

pub async fn fast_engine() -> TestEngine {
    engine_with(&fast_config()).await
}

pub fn sample_defect(created_by: &str, photos: &[&str]) -> NewDefect {
    NewDefect {
        object: "Block A, room 12".to_string(),
        floor: Some("3".to_string()),
        category: Category::Finishing,
        severity: Severity::Medium,
        description: Some("Cracked tile".to_string()),
        created_by: created_by.to_string(),
        photos: photos
            .iter()
            .map(|p| NewPhoto {
                photo_ref: p.to_string(),
                role: PhotoRole::Initial,
            })
            .collect(),
    }
}

pub async fn create_sample(store: &DefectStore, created_by: &str) -> Defect {
    store
        .create_defect(&sample_defect(created_by, &["p-1"]))
        .await
        .unwrap()
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
