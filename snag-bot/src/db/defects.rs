//! Durable defect storage
//!
//! Every mutating method commits the entity change and its audit row in one
//! transaction, and the first statement of each such transaction is a write.
//! Operations addressed by human-readable ID fail with `Rejected(NotFound)`
//! when the ID does not resolve.

use crate::lifecycle;
use chrono::{DateTime, Utc};
use snag_common::db::{
    format_human_id, ActionPayload, Category, Defect, DefectAction, DefectPhoto, DefectStatus,
    EditableField, PhotoCounts, PhotoRole, Severity,
};
use snag_common::{time, Error, FailureReason, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const DEFECT_COLUMNS: &str = "id, human_id, object, floor, category, severity, description, status, \
     created_by, assigned_to, due_date, last_reminder_at, created_at, updated_at, closed_at";

/// Fields of a defect about to be created
#[derive(Debug, Clone)]
pub struct NewDefect {
    pub object: String,
    pub floor: Option<String>,
    pub category: Category,
    pub severity: Severity,
    pub description: Option<String>,
    pub created_by: String,
    pub photos: Vec<NewPhoto>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPhoto {
    pub photo_ref: String,
    pub role: PhotoRole,
}

/// Committed status change
#[derive(Debug, Clone)]
pub struct Transition {
    pub defect: Defect,
    pub from: DefectStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    /// Due date ascending, undated last
    DueAsc,
    CreatedDesc,
}

/// Filter and page for [`DefectStore::list_defects`]
#[derive(Debug, Clone)]
pub struct DefectQuery {
    pub assignee: Option<String>,
    /// Empty means any status
    pub statuses: Vec<DefectStatus>,
    /// Inclusive lower bound on due date
    pub due_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on due date
    pub due_before: Option<DateTime<Utc>>,
    pub order: ListOrder,
    pub limit: u32,
    pub offset: u32,
}

impl Default for DefectQuery {
    fn default() -> Self {
        Self {
            assignee: None,
            statuses: Vec::new(),
            due_from: None,
            due_before: None,
            order: ListOrder::DueAsc,
            limit: 10,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DefectPage {
    pub rows: Vec<Defect>,
    /// Matching rows ignoring limit/offset
    pub total: i64,
}

/// Defect repository over the shared SQLite pool
#[derive(Clone)]
pub struct DefectStore {
    pool: SqlitePool,
}

fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    time::from_db(raw).ok_or_else(|| Error::Internal(format!("bad timestamp in {}: {}", column, raw)))
}

fn parse_opt_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s, column)).transpose()
}

fn defect_from_row(row: &SqliteRow) -> Result<Defect> {
    Ok(Defect {
        id: row.get("id"),
        human_id: row.get("human_id"),
        object: row.get("object"),
        floor: row.get("floor"),
        category: row.get::<String, _>("category").parse()?,
        severity: row.get::<String, _>("severity").parse()?,
        description: row.get("description"),
        status: row.get::<String, _>("status").parse()?,
        created_by: row.get("created_by"),
        assigned_to: row.get("assigned_to"),
        due_date: parse_opt_ts(row.get("due_date"), "due_date")?,
        last_reminder_at: parse_opt_ts(row.get("last_reminder_at"), "last_reminder_at")?,
        created_at: parse_ts(&row.get::<String, _>("created_at"), "created_at")?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"), "updated_at")?,
        closed_at: parse_opt_ts(row.get("closed_at"), "closed_at")?,
    })
}

fn not_found() -> Error {
    Error::Rejected(FailureReason::NotFound)
}

impl DefectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new defect in `discovered` with its photos
    ///
    /// Writes `add_photo` (when photos are supplied) then `create`, all in
    /// the same transaction as the defect and photo rows.
    pub async fn create_defect(&self, new: &NewDefect) -> Result<Defect> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;

        let seq: i64 = sqlx::query_scalar(
            "UPDATE defect_sequence SET value = value + 1 WHERE name = 'defect' RETURNING value",
        )
        .fetch_one(&mut *tx)
        .await?;

        let defect = Defect {
            id: Uuid::new_v4().to_string(),
            human_id: format_human_id(seq),
            object: new.object.clone(),
            floor: new.floor.clone(),
            category: new.category,
            severity: new.severity,
            description: new.description.clone(),
            status: DefectStatus::Discovered,
            created_by: new.created_by.clone(),
            assigned_to: None,
            due_date: None,
            last_reminder_at: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO defects (id, human_id, object, floor, category, severity, description,
                                 status, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&defect.id)
        .bind(&defect.human_id)
        .bind(&defect.object)
        .bind(&defect.floor)
        .bind(defect.category.as_str())
        .bind(defect.severity.as_str())
        .bind(&defect.description)
        .bind(defect.status.as_str())
        .bind(&defect.created_by)
        .bind(time::to_db(&now))
        .bind(time::to_db(&now))
        .execute(&mut *tx)
        .await?;

        if let Some(first) = new.photos.first() {
            for photo in &new.photos {
                insert_photo(&mut tx, &defect.id, photo.role, &photo.photo_ref, &new.created_by, &now)
                    .await?;
            }
            insert_action(
                &mut tx,
                &defect.id,
                &new.created_by,
                &ActionPayload::AddPhoto {
                    role: first.role,
                    count: new.photos.len(),
                },
                &now,
            )
            .await?;
        }

        insert_action(
            &mut tx,
            &defect.id,
            &new.created_by,
            &ActionPayload::Create {
                status: defect.status,
                category: defect.category,
                severity: defect.severity,
            },
            &now,
        )
        .await?;

        tx.commit().await?;

        info!(
            human_id = %defect.human_id,
            created_by = %defect.created_by,
            photos = new.photos.len(),
            "Defect created"
        );
        Ok(defect)
    }

    pub async fn get_by_human_id(&self, human_id: &str) -> Result<Option<Defect>> {
        let row = sqlx::query(&format!("SELECT {} FROM defects WHERE human_id = ?", DEFECT_COLUMNS))
            .bind(human_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(defect_from_row).transpose()
    }

    /// Photo counts shown on cards (`before` photos count as initial)
    pub async fn photo_counts(&self, defect_id: &str) -> Result<PhotoCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN role IN ('initial', 'before') THEN 1 ELSE 0 END), 0) AS initial,
                COALESCE(SUM(CASE WHEN role = 'after' THEN 1 ELSE 0 END), 0) AS after
            FROM defect_photos
            WHERE defect_id = ?
            "#,
        )
        .bind(defect_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PhotoCounts {
            initial: row.get("initial"),
            after: row.get("after"),
        })
    }

    /// Photos in insertion order, optionally restricted to one role
    pub async fn list_photos(&self, defect_id: &str, role: Option<PhotoRole>) -> Result<Vec<DefectPhoto>> {
        let rows = sqlx::query(
            r#"
            SELECT defect_id, role, photo_ref, created_by, created_at
            FROM defect_photos
            WHERE defect_id = ? AND (? IS NULL OR role = ?)
            ORDER BY id
            "#,
        )
        .bind(defect_id)
        .bind(role.map(|r| r.as_str()))
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DefectPhoto {
                    defect_id: row.get("defect_id"),
                    role: row.get::<String, _>("role").parse()?,
                    photo_ref: row.get("photo_ref"),
                    created_by: row.get("created_by"),
                    created_at: parse_ts(&row.get::<String, _>("created_at"), "created_at")?,
                })
            })
            .collect()
    }

    /// Attach photos to an existing defect with one `add_photo` audit row
    pub async fn add_photos(
        &self,
        human_id: &str,
        role: PhotoRole,
        photo_refs: &[String],
        actor: &str,
    ) -> Result<Defect> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let defect = fetch_for_update(&mut tx, human_id).await?;

        if photo_refs.is_empty() {
            return Ok(defect);
        }

        for photo_ref in photo_refs {
            insert_photo(&mut tx, &defect.id, role, photo_ref, actor, &now).await?;
        }
        insert_action(
            &mut tx,
            &defect.id,
            actor,
            &ActionPayload::AddPhoto {
                role,
                count: photo_refs.len(),
            },
            &now,
        )
        .await?;

        touch(&mut tx, &defect.id, &now).await?;
        tx.commit().await?;

        debug!(human_id = %human_id, role = %role, count = photo_refs.len(), "Photos attached");
        Ok(defect)
    }

    /// Move a defect to `to`, enforcing the lifecycle rules and guards
    pub async fn transition(&self, human_id: &str, to: DefectStatus, actor: &str) -> Result<Transition> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let mut defect = fetch_for_update(&mut tx, human_id).await?;
        let from = defect.status;

        let after_photos: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM defect_photos WHERE defect_id = ? AND role = 'after'",
        )
        .bind(&defect.id)
        .fetch_one(&mut *tx)
        .await?;

        lifecycle::check_transition(from, to, after_photos)?;

        let closed_at = (to == DefectStatus::Fixed).then_some(now);
        sqlx::query("UPDATE defects SET status = ?, closed_at = ?, updated_at = ? WHERE id = ?")
            .bind(to.as_str())
            .bind(closed_at.as_ref().map(time::to_db))
            .bind(time::to_db(&now))
            .bind(&defect.id)
            .execute(&mut *tx)
            .await?;

        insert_action(&mut tx, &defect.id, actor, &ActionPayload::StatusChange { from, to }, &now)
            .await?;
        tx.commit().await?;

        info!(human_id = %human_id, from = %from, to = %to, actor = %actor, "Defect status changed");

        defect.status = to;
        defect.closed_at = closed_at;
        defect.updated_at = now;
        Ok(Transition { defect, from })
    }

    /// Set the responsible party
    pub async fn assign(&self, human_id: &str, assignee: &str, actor: &str) -> Result<Defect> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let mut defect = fetch_for_update(&mut tx, human_id).await?;

        sqlx::query("UPDATE defects SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(assignee)
            .bind(time::to_db(&now))
            .bind(&defect.id)
            .execute(&mut *tx)
            .await?;
        insert_action(
            &mut tx,
            &defect.id,
            actor,
            &ActionPayload::Assign {
                to: assignee.to_string(),
            },
            &now,
        )
        .await?;
        tx.commit().await?;

        defect.assigned_to = Some(assignee.to_string());
        defect.updated_at = now;
        Ok(defect)
    }

    /// Clear the responsible party
    pub async fn unassign(&self, human_id: &str, actor: &str) -> Result<Defect> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let mut defect = fetch_for_update(&mut tx, human_id).await?;

        sqlx::query("UPDATE defects SET assigned_to = NULL, updated_at = ? WHERE id = ?")
            .bind(time::to_db(&now))
            .bind(&defect.id)
            .execute(&mut *tx)
            .await?;
        insert_action(
            &mut tx,
            &defect.id,
            actor,
            &ActionPayload::AssignClear {
                from: defect.assigned_to.clone(),
            },
            &now,
        )
        .await?;
        tx.commit().await?;

        defect.assigned_to = None;
        defect.updated_at = now;
        Ok(defect)
    }

    pub async fn set_due_date(&self, human_id: &str, due: DateTime<Utc>, actor: &str) -> Result<Defect> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let mut defect = fetch_for_update(&mut tx, human_id).await?;

        sqlx::query("UPDATE defects SET due_date = ?, updated_at = ? WHERE id = ?")
            .bind(time::to_db(&due))
            .bind(time::to_db(&now))
            .bind(&defect.id)
            .execute(&mut *tx)
            .await?;
        insert_action(&mut tx, &defect.id, actor, &ActionPayload::DueChange { due }, &now).await?;
        tx.commit().await?;

        defect.due_date = Some(due);
        defect.updated_at = now;
        Ok(defect)
    }

    /// Correct a free-text field of a saved defect
    pub async fn update_field(
        &self,
        human_id: &str,
        field: EditableField,
        value: &str,
        actor: &str,
    ) -> Result<Defect> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput(format!("{} must not be empty", field)));
        }

        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let mut defect = fetch_for_update(&mut tx, human_id).await?;

        let previous = match field {
            EditableField::Object => Some(defect.object.clone()),
            EditableField::Floor => defect.floor.clone(),
            EditableField::Description => defect.description.clone(),
        };

        // Column name comes from a closed enum
        sqlx::query(&format!(
            "UPDATE defects SET {} = ?, updated_at = ? WHERE id = ?",
            field.column()
        ))
        .bind(value)
        .bind(time::to_db(&now))
        .bind(&defect.id)
        .execute(&mut *tx)
        .await?;
        insert_action(
            &mut tx,
            &defect.id,
            actor,
            &ActionPayload::Update {
                field,
                from: previous,
                to: value.to_string(),
            },
            &now,
        )
        .await?;
        tx.commit().await?;

        match field {
            EditableField::Object => defect.object = value.to_string(),
            EditableField::Floor => defect.floor = Some(value.to_string()),
            EditableField::Description => defect.description = Some(value.to_string()),
        }
        defect.updated_at = now;
        Ok(defect)
    }

    /// Filtered, ordered, paginated listing with the unpaginated total
    pub async fn list_defects(&self, query: &DefectQuery) -> Result<DefectPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(assignee) = &query.assignee {
            clauses.push("assigned_to = ?".to_string());
            binds.push(assignee.clone());
        }
        if !query.statuses.is_empty() {
            let marks = vec!["?"; query.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", marks));
            binds.extend(query.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(from) = &query.due_from {
            clauses.push("due_date >= ?".to_string());
            binds.push(time::to_db(from));
        }
        if let Some(before) = &query.due_before {
            clauses.push("due_date < ?".to_string());
            binds.push(time::to_db(before));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let order_sql = match query.order {
            ListOrder::DueAsc => "due_date IS NULL, due_date ASC, created_at ASC",
            ListOrder::CreatedDesc => "created_at DESC",
        };

        let count_sql = format!("SELECT COUNT(*) FROM defects{}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &binds {
            count_query = count_query.bind(value);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let rows_sql = format!(
            "SELECT {} FROM defects{} ORDER BY {} LIMIT {} OFFSET {}",
            DEFECT_COLUMNS, where_sql, order_sql, query.limit, query.offset
        );
        let mut rows_query = sqlx::query(&rows_sql);
        for value in &binds {
            rows_query = rows_query.bind(value);
        }
        let rows = rows_query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(defect_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(DefectPage { rows, total })
    }

    /// Defects eligible for an overdue reminder at `now`
    ///
    /// Not fixed, due before `now`, and never reminded or last reminded at
    /// least `cooldown` ago. Oldest due first.
    pub async fn overdue_candidates(
        &self,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<Defect>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM defects
            WHERE status <> 'fixed'
              AND due_date IS NOT NULL
              AND due_date < ?
              AND (last_reminder_at IS NULL OR last_reminder_at <= ?)
            ORDER BY due_date ASC
            LIMIT ?
            "#,
            DEFECT_COLUMNS
        ))
        .bind(time::to_db(&now))
        .bind(time::to_db(&(now - cooldown)))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(defect_from_row).collect()
    }

    /// Atomically claim one overdue reminder
    ///
    /// Re-checks eligibility in the `UPDATE` itself, so of two overlapping
    /// sweeps only one gets `true`. The `notify_overdue` audit row commits
    /// together with the new `last_reminder_at`.
    pub async fn claim_overdue(
        &self,
        defect_id: &str,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
        recipients: &[String],
        actor: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let due: Option<Option<String>> = sqlx::query_scalar(
            r#"
            UPDATE defects
            SET last_reminder_at = ?
            WHERE id = ?
              AND status <> 'fixed'
              AND due_date IS NOT NULL
              AND due_date < ?
              AND (last_reminder_at IS NULL OR last_reminder_at <= ?)
            RETURNING due_date
            "#,
        )
        .bind(time::to_db(&now))
        .bind(defect_id)
        .bind(time::to_db(&now))
        .bind(time::to_db(&(now - cooldown)))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(due) = due else {
            tx.rollback().await?;
            return Ok(false);
        };

        insert_action(
            &mut tx,
            defect_id,
            actor,
            &ActionPayload::NotifyOverdue {
                recipients: recipients.to_vec(),
                due: parse_opt_ts(due, "due_date")?,
            },
            &now,
        )
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Audit trail of one defect, oldest first
    pub async fn list_actions(&self, defect_id: &str) -> Result<Vec<DefectAction>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, defect_id, actor_id, payload, created_at
            FROM defect_actions
            WHERE defect_id = ?
            ORDER BY seq
            "#,
        )
        .bind(defect_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DefectAction {
                    seq: row.get("seq"),
                    defect_id: row.get("defect_id"),
                    actor_id: row.get("actor_id"),
                    payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
                    created_at: parse_ts(&row.get::<String, _>("created_at"), "created_at")?,
                })
            })
            .collect()
    }
}

/// Lock and read a defect; must be the first statement of its transaction
///
/// The no-op `UPDATE` takes the write lock up front, waiting on the busy
/// timeout. A transaction that reads first and writes later fails with
/// `SQLITE_BUSY_SNAPSHOT` when another connection commits in between.
async fn fetch_for_update(tx: &mut Transaction<'_, Sqlite>, human_id: &str) -> Result<Defect> {
    let row = sqlx::query(&format!(
        "UPDATE defects SET updated_at = updated_at WHERE human_id = ? RETURNING {}",
        DEFECT_COLUMNS
    ))
    .bind(human_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(not_found)?;

    defect_from_row(&row)
}

async fn touch(tx: &mut Transaction<'_, Sqlite>, defect_id: &str, now: &DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE defects SET updated_at = ? WHERE id = ?")
        .bind(time::to_db(now))
        .bind(defect_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_photo(
    tx: &mut Transaction<'_, Sqlite>,
    defect_id: &str,
    role: PhotoRole,
    photo_ref: &str,
    created_by: &str,
    now: &DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO defect_photos (defect_id, role, photo_ref, created_by, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(defect_id)
    .bind(role.as_str())
    .bind(photo_ref)
    .bind(created_by)
    .bind(time::to_db(now))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_action(
    tx: &mut Transaction<'_, Sqlite>,
    defect_id: &str,
    actor: &str,
    payload: &ActionPayload,
    now: &DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO defect_actions (defect_id, actor_id, action, payload, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(defect_id)
    .bind(actor)
    .bind(payload.kind().as_str())
    .bind(serde_json::to_string(payload)?)
    .bind(time::to_db(now))
    .execute(&mut **tx)
    .await?;
    Ok(())
}
