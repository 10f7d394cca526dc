//! Keyed ephemeral state
//!
//! In-progress conversation state (drafts, wizard progress, mode flags) is
//! kept per `(actor, purpose)` with a time-to-live. Values are opaque JSON
//! strings; [`load`] and [`save`] add typed access on top.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snag_common::{time, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What a piece of ephemeral state is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Draft,
    ControlWizard,
    AfterMode,
    CardEdit,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Draft => "draft",
            Purpose::ControlWizard => "control_wizard",
            Purpose::AfterMode => "after_mode",
            Purpose::CardEdit => "card_edit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub actor: String,
    pub purpose: Purpose,
}

impl StateKey {
    pub fn new(actor: &str, purpose: Purpose) -> Self {
        Self {
            actor: actor.to_string(),
            purpose,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.purpose.as_str(), self.actor)
    }
}

/// Get/set/clear capability over keyed state with expiry
///
/// Last write wins per key; no cross-key transactions.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Current value, `None` if absent or expired
    async fn get(&self, key: &StateKey) -> Result<Option<String>>;

    async fn set(&self, key: &StateKey, value: String, ttl: Duration) -> Result<()>;

    async fn clear(&self, key: &StateKey) -> Result<()>;
}

/// Load and decode a typed value
///
/// A value that no longer decodes (e.g. written by an older build) is
/// discarded rather than wedging the conversation.
pub async fn load<T: DeserializeOwned>(
    store: &dyn EphemeralStore,
    key: &StateKey,
) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key = %key, "Discarding undecodable ephemeral state: {}", e);
            store.clear(key).await?;
            Ok(None)
        }
    }
}

/// Encode and store a typed value
pub async fn save<T: Serialize>(
    store: &dyn EphemeralStore,
    key: &StateKey,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, ttl).await
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
    time::now() + ttl
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct MemoryEphemeralStore {
    entries: Mutex<HashMap<StateKey, (String, DateTime<Utc>)>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = time::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|(_, exp)| *exp > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn get(&self, key: &StateKey) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > time::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &StateKey, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.clone(), (value, expiry(ttl)));
        Ok(())
    }

    async fn clear(&self, key: &StateKey) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by the `ephemeral_state` table, survives restarts
pub struct SqliteEphemeralStore {
    pool: SqlitePool,
}

impl SqliteEphemeralStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ephemeral_state WHERE expires_at <= ?")
            .bind(time::to_db(&time::now()))
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("Purged {} expired ephemeral entries", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl EphemeralStore for SqliteEphemeralStore {
    async fn get(&self, key: &StateKey) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value, expires_at FROM ephemeral_state WHERE actor_id = ? AND purpose = ?",
        )
        .bind(&key.actor)
        .bind(key.purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: String = row.get("expires_at");
        if expires_at <= time::to_db(&time::now()) {
            self.clear(key).await?;
            return Ok(None);
        }

        Ok(Some(row.get("value")))
    }

    async fn set(&self, key: &StateKey, value: String, ttl: Duration) -> Result<()> {
        let now = time::now();
        sqlx::query(
            r#"
            INSERT INTO ephemeral_state (actor_id, purpose, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(actor_id, purpose) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.actor)
        .bind(key.purpose.as_str())
        .bind(value)
        .bind(time::to_db(&expiry(ttl)))
        .bind(time::to_db(&now))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, key: &StateKey) -> Result<()> {
        sqlx::query("DELETE FROM ephemeral_state WHERE actor_id = ? AND purpose = ?")
            .bind(&key.actor)
            .bind(key.purpose.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
