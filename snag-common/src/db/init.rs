//! Database initialization
//!
//! Creates the database file on first run and brings the schema up to date.
//! Every statement is idempotent so startup can always run the full sequence.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the database at `db_path` and initialize the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes on an already-open pool
///
/// Separate from [`init_database`] so in-memory pools can be prepared the
/// same way.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_ephemeral_state_table(pool).await?;
    create_defect_sequence_table(pool).await?;
    create_defects_table(pool).await?;
    create_defect_photos_table(pool).await?;
    create_defect_actions_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ephemeral_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ephemeral_state (
            actor_id TEXT NOT NULL,
            purpose TEXT NOT NULL,
            value TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (actor_id, purpose)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ephemeral_expires ON ephemeral_state(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_defect_sequence_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS defect_sequence (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO defect_sequence (name, value) VALUES ('defect', 0)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_defects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS defects (
            id TEXT PRIMARY KEY,
            human_id TEXT NOT NULL UNIQUE,
            object TEXT NOT NULL,
            floor TEXT,
            category TEXT NOT NULL CHECK (category IN (
                'architecture', 'structural', 'electrical',
                'plumbing', 'finishing', 'landscaping'
            )),
            severity TEXT NOT NULL CHECK (severity IN ('critical', 'medium', 'low')),
            description TEXT,
            status TEXT NOT NULL DEFAULT 'discovered' CHECK (status IN (
                'discovered', 'on_control', 'fixed', 'awaiting_review'
            )),
            created_by TEXT NOT NULL,
            assigned_to TEXT,
            due_date TEXT,
            last_reminder_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            closed_at TEXT,
            CHECK ((status = 'fixed') = (closed_at IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_defects_assignee_due ON defects(assigned_to, due_date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_defects_status_due ON defects(status, due_date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_defects_created ON defects(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_defect_photos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS defect_photos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            defect_id TEXT NOT NULL REFERENCES defects(id),
            role TEXT NOT NULL CHECK (role IN ('initial', 'before', 'after', 'generic')),
            photo_ref TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_defect_photos_defect ON defect_photos(defect_id, role)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_defect_actions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS defect_actions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            defect_id TEXT NOT NULL REFERENCES defects(id),
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_defect_actions_defect ON defect_actions(defect_id, seq)")
        .execute(pool)
        .await?;

    Ok(())
}
