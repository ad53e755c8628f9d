//! Durable record store
//!
//! Holds the owner registry, accepted records and the ingestion audit log in
//! one libSQL database. The single connection sits behind a mutex, so a
//! transaction opened by [`Store::insert_batch`] never interleaves with other
//! statements.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Builder, Connection, Row, Value};
use serde::Serialize;
use stride_core::models::ValidationIssue;
use stride_core::RecordKind;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    LibSql(#[from] libsql::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

type Result<T> = std::result::Result<T, StoreError>;

/// Origin ids bound per statement, well under SQLite's host parameter limit
const ORIGIN_ID_CHUNK: usize = 500;

/// A record accepted by the ingestion engine, ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Position in the submitted batch
    pub record_index: usize,
    pub origin_id: Option<String>,
    /// Fuzzy-dedup scope within a kind (metric type for metrics, empty otherwise)
    pub scope: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub payload: serde_json::Value,
    /// Written to the record and the audit log only if the insert lands
    pub warnings: Vec<ValidationIssue>,
}

/// Existing record considered by fuzzy deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyRecord {
    pub id: String,
    pub origin_id: Option<String>,
    pub start: DateTime<Utc>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    Warning,
    Duplicate,
}

impl AuditEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Audit row to be written alongside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub record_index: usize,
    pub origin_id: Option<String>,
    pub event: AuditEvent,
    pub field: Option<String>,
    pub message: String,
    /// Stored record a duplicate was matched against
    pub matched_record_id: Option<String>,
}

/// Audit row as read back for review
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub id: i64,
    pub owner_id: String,
    pub kind: String,
    pub origin_id: Option<String>,
    pub record_index: i64,
    pub event: String,
    pub field: Option<String>,
    pub message: String,
    pub matched_record_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    pub kind: String,
    pub origin_id: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub payload: serde_json::Value,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    /// Inserts ignored by the unique origin-id index
    pub backstop_duplicates: usize,
    /// Warnings carried by the records that were inserted
    pub warnings: usize,
}

pub struct Store {
    _db: libsql::Database,
    conn: Mutex<Connection>,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Builder::new_local(path.to_string_lossy().as_ref())
            .build()
            .await?;
        let store = Self::from_database(db).await?;
        tracing::debug!("Opened record store at {}", path.display());
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: libsql::Database) -> Result<Self> {
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA foreign_keys = ON;", ()).await.ok();
        conn.execute("PRAGMA busy_timeout = 5000;", ()).await.ok();
        migrations::run(&conn).await?;
        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
        })
    }

    /// Register an owner; returns `false` when it already existed
    pub async fn register_owner(&self, owner_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO owners (id, created_at) VALUES (?1, ?2)",
                libsql::params![owner_id, Utc::now().timestamp_millis()],
            )
            .await?;
        Ok(inserted > 0)
    }

    pub async fn owner_exists(&self, owner_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM owners WHERE id = ?1)",
                libsql::params![owner_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? != 0),
            None => Ok(false),
        }
    }

    /// Records of one owner, kind and scope starting within `window` of `start`
    pub async fn records_near(
        &self,
        owner_id: &str,
        kind: RecordKind,
        scope: &str,
        start: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Vec<NearbyRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, origin_id, start_at, duration_secs FROM records
                 WHERE owner_id = ?1 AND kind = ?2 AND scope = ?3
                   AND start_at BETWEEN ?4 AND ?5
                 ORDER BY start_at ASC, id ASC",
                libsql::params![
                    owner_id,
                    kind.as_str(),
                    scope,
                    (start - window).timestamp_millis(),
                    (start + window).timestamp_millis()
                ],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(NearbyRecord {
                id: row.get(0)?,
                origin_id: row.get(1)?,
                start: millis_to_datetime(row.get(2)?)?,
                duration_secs: row.get(3)?,
            });
        }
        Ok(records)
    }

    /// Which of `origin_ids` are already stored, as `(origin_id, record_id)` pairs
    pub async fn origin_ids_present(
        &self,
        owner_id: &str,
        kind: RecordKind,
        origin_ids: &[String],
    ) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        let mut present = Vec::new();
        for chunk in origin_ids.chunks(ORIGIN_ID_CHUNK) {
            let (placeholders, params) = origin_id_params(owner_id, kind, chunk);
            let sql = format!(
                "SELECT origin_id, id FROM records
                 WHERE owner_id = ?1 AND kind = ?2 AND origin_id IN ({placeholders})"
            );
            let mut rows = conn.query(&sql, params).await?;
            while let Some(row) = rows.next().await? {
                present.push((row.get(0)?, row.get(1)?));
            }
        }
        Ok(present)
    }

    /// Insert accepted records and their audit rows in one transaction.
    ///
    /// An insert ignored by the origin-id index is counted as a duplicate and
    /// audited instead of failing the batch. A record's warnings are counted
    /// and audited only when its insert lands.
    pub async fn insert_batch(
        &self,
        owner_id: &str,
        kind: RecordKind,
        records: &[NewRecord],
        audit: &[AuditEntry],
    ) -> Result<InsertSummary> {
        if records.is_empty() && audit.is_empty() {
            return Ok(InsertSummary::default());
        }

        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        match write_batch(&conn, owner_id, kind, records, audit).await {
            Ok(summary) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(summary)
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }

    pub async fn find_by_origin_ids(
        &self,
        owner_id: &str,
        kind: RecordKind,
        origin_ids: &[String],
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock().await;
        let mut records = Vec::new();
        for chunk in origin_ids.chunks(ORIGIN_ID_CHUNK) {
            let (placeholders, params) = origin_id_params(owner_id, kind, chunk);
            let sql = format!(
                "SELECT id, kind, origin_id, start_at, end_at, duration_secs, payload, warnings, created_at
                 FROM records
                 WHERE owner_id = ?1 AND kind = ?2 AND origin_id IN ({placeholders})"
            );
            let mut rows = conn.query(&sql, params).await?;
            while let Some(row) = rows.next().await? {
                records.push(parse_stored_record(&row)?);
            }
        }
        records.sort_by(|a, b| a.start_at.cmp(&b.start_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    pub async fn delete_by_origin_ids(
        &self,
        owner_id: &str,
        kind: RecordKind,
        origin_ids: &[String],
    ) -> Result<u64> {
        if origin_ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let mut deleted = 0;
        for chunk in origin_ids.chunks(ORIGIN_ID_CHUNK) {
            let (placeholders, params) = origin_id_params(owner_id, kind, chunk);
            let sql = format!(
                "DELETE FROM records
                 WHERE owner_id = ?1 AND kind = ?2 AND origin_id IN ({placeholders})"
            );
            match conn.execute(&sql, params).await {
                Ok(removed) => deleted += removed,
                Err(e) => {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
            }
        }
        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(deleted)
    }

    /// Most recent audit rows for one owner, newest first
    pub async fn audit_for_owner(&self, owner_id: &str, limit: u32) -> Result<Vec<AuditRow>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, owner_id, kind, origin_id, record_index, event, field, message,
                        matched_record_id, created_at
                 FROM ingest_audit
                 WHERE owner_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
                libsql::params![owner_id, i64::from(limit)],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(AuditRow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                kind: row.get(2)?,
                origin_id: row.get(3)?,
                record_index: row.get(4)?,
                event: row.get(5)?,
                field: row.get(6)?,
                message: row.get(7)?,
                matched_record_id: row.get(8)?,
                created_at: millis_to_datetime(row.get(9)?)?,
            });
        }
        Ok(entries)
    }
}

async fn write_batch(
    conn: &Connection,
    owner_id: &str,
    kind: RecordKind,
    records: &[NewRecord],
    audit: &[AuditEntry],
) -> Result<InsertSummary> {
    let now = Utc::now().timestamp_millis();
    let mut summary = InsertSummary::default();
    let mut outcome_audit = Vec::new();

    for record in records {
        let warnings = if record.warnings.is_empty() {
            None
        } else {
            let lines: Vec<String> = record.warnings.iter().map(ToString::to_string).collect();
            Some(serde_json::to_string(&lines)?)
        };
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO records
                    (id, owner_id, kind, origin_id, scope, start_at, end_at, duration_secs,
                     payload, warnings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                libsql::params![
                    Uuid::now_v7().to_string(),
                    owner_id,
                    kind.as_str(),
                    record.origin_id.clone(),
                    record.scope.clone(),
                    record.start.timestamp_millis(),
                    record.end.map(|end| end.timestamp_millis()),
                    record.duration_secs,
                    serde_json::to_string(&record.payload)?,
                    warnings,
                    now
                ],
            )
            .await?;

        if inserted == 0 {
            summary.backstop_duplicates += 1;
            outcome_audit.push(AuditEntry {
                record_index: record.record_index,
                origin_id: record.origin_id.clone(),
                event: AuditEvent::Duplicate,
                field: Some("origin_id".to_string()),
                message: "origin id already stored".to_string(),
                matched_record_id: None,
            });
        } else {
            summary.inserted += 1;
            summary.warnings += record.warnings.len();
            outcome_audit.extend(record.warnings.iter().map(|warning| AuditEntry {
                record_index: record.record_index,
                origin_id: record.origin_id.clone(),
                event: AuditEvent::Warning,
                field: Some(warning.field.clone()),
                message: warning.message.clone(),
                matched_record_id: None,
            }));
        }
    }

    for entry in audit.iter().chain(outcome_audit.iter()) {
        conn.execute(
            "INSERT INTO ingest_audit
                (owner_id, kind, origin_id, record_index, event, field, message,
                 matched_record_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            libsql::params![
                owner_id,
                kind.as_str(),
                entry.origin_id.clone(),
                i64::try_from(entry.record_index).unwrap_or(i64::MAX),
                entry.event.as_str(),
                entry.field.clone(),
                entry.message.clone(),
                entry.matched_record_id.clone(),
                now
            ],
        )
        .await?;
    }

    Ok(summary)
}

/// `?3, ?4, ...` placeholders plus positional params led by owner and kind
fn origin_id_params(owner_id: &str, kind: RecordKind, origin_ids: &[String]) -> (String, Params) {
    let placeholders = (3..3 + origin_ids.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut values = Vec::with_capacity(origin_ids.len() + 2);
    values.push(Value::Text(owner_id.to_string()));
    values.push(Value::Text(kind.as_str().to_string()));
    values.extend(origin_ids.iter().cloned().map(Value::Text));
    (placeholders, Params::Positional(values))
}

fn parse_stored_record(row: &Row) -> Result<StoredRecord> {
    let payload: String = row.get(6)?;
    let warnings: Option<String> = row.get(7)?;
    let end_at: Option<i64> = row.get(4)?;
    Ok(StoredRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        origin_id: row.get(2)?,
        start_at: millis_to_datetime(row.get(3)?)?,
        end_at: end_at.map(millis_to_datetime).transpose()?,
        duration_secs: row.get(5)?,
        payload: serde_json::from_str(&payload)?,
        warnings: warnings
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?
            .unwrap_or_default(),
        created_at: millis_to_datetime(row.get(8)?)?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}
