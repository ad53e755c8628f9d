//! Durable client-side retry queue
//!
//! Every batch whose delivery has not been confirmed lives here until the
//! backend acknowledges it or the entry exhausts its retries. Entries are
//! never dropped on failure: they either complete or end up `failed` for
//! manual recovery.

mod policy;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use libsql::Row;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{OperationId, OperationStatus, OperationType, SyncOperation};

pub use policy::{RetryPolicy, DEFAULT_MAX_RETRIES};

const OPERATION_COLUMNS: &str = "id, operation_type, owner_id, payload, endpoint, status, \
     retry_count, last_error, created_at, next_retry_at, completed_at";

/// Counts reported by [`SyncQueue::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending_count: u64,
    pub failed_count: u64,
    pub completed_count: u64,
    /// Pending entries whose retry time has passed
    pub due_count: u64,
}

/// Explicitly constructed queue service.
///
/// Cloning is cheap and shares the same connection; the connection mutex
/// serializes writers within the process.
#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<Mutex<Database>>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl SyncQueue {
    pub fn new(db: Database, policy: RetryPolicy) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    /// Open (or create) the queue database at `path`
    pub async fn open(path: impl Into<PathBuf>, policy: RetryPolicy) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::open(&path).await?;
        Ok(Self::new(db, policy))
    }

    /// Open an in-memory queue (primarily for tests)
    pub async fn open_in_memory(policy: RetryPolicy) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(db, policy))
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persist a new pending entry, due immediately.
    ///
    /// The entry is committed before this returns.
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        owner_id: &str,
        payload: Vec<u8>,
        endpoint: &str,
    ) -> Result<SyncOperation> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".into()));
        }
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::InvalidInput("endpoint must not be empty".into()));
        }

        let operation = SyncOperation::new(
            operation_type,
            owner_id,
            payload,
            endpoint,
            // Stored at millisecond precision
            self.clock.now().trunc_subsecs(3),
        );

        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO sync_operations
                    (id, operation_type, owner_id, payload, endpoint, status, retry_count,
                     last_error, created_at, next_retry_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, NULL, ?6, ?7, NULL)",
                libsql::params![
                    operation.id.as_str(),
                    operation.operation_type.as_str(),
                    operation.owner_id.clone(),
                    operation.payload.clone(),
                    operation.endpoint.clone(),
                    operation.created_at.timestamp_millis(),
                    operation.created_at.timestamp_millis()
                ],
            )
            .await?;

        tracing::debug!(
            operation = %operation.id,
            operation_type = %operation.operation_type,
            payload_bytes = operation.payload.len(),
            "Enqueued sync operation"
        );
        Ok(operation)
    }

    /// Fetch one entry by id
    pub async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>> {
        let db = self.db.lock().await;
        Self::fetch(db.connection(), id).await
    }

    /// Pending entries whose retry time has passed, oldest first
    pub async fn due_operations(&self) -> Result<Vec<SyncOperation>> {
        let now = self.clock.now().timestamp_millis();
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM sync_operations
             WHERE status = 'pending' AND next_retry_at <= ?1
             ORDER BY created_at ASC, id ASC"
        );
        let mut rows = db.connection().query(&sql, libsql::params![now]).await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(parse_operation(&row)?);
        }
        Ok(operations)
    }

    /// Record a confirmed delivery. Calling it again is a no-op.
    pub async fn mark_success(&self, id: &OperationId) -> Result<()> {
        let now = self.clock.now().timestamp_millis();
        let db = self.db.lock().await;
        let updated = db
            .connection()
            .execute(
                "UPDATE sync_operations
                 SET status = 'completed', completed_at = ?1, next_retry_at = NULL
                 WHERE id = ?2 AND status = 'pending'",
                libsql::params![now, id.as_str()],
            )
            .await?;

        if updated == 0 {
            let current = Self::fetch(db.connection(), id)
                .await?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if current.status == OperationStatus::Failed {
                tracing::warn!(operation = %id, "Ignoring success for an operation already marked failed");
            }
            return Ok(());
        }

        tracing::debug!(operation = %id, "Sync operation completed");
        Ok(())
    }

    /// Record a failed delivery attempt and schedule the next one.
    ///
    /// Once the retry count reaches the policy maximum the entry becomes
    /// `failed` and is never scheduled again. Terminal entries are returned
    /// unchanged.
    pub async fn mark_failure(&self, id: &OperationId, error: &str) -> Result<SyncOperation> {
        self.record_failure(id, error, false).await
    }

    /// Record a permanent rejection: the entry fails without further retries
    pub async fn mark_rejected(&self, id: &OperationId, error: &str) -> Result<SyncOperation> {
        self.record_failure(id, error, true).await
    }

    async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        permanent: bool,
    ) -> Result<SyncOperation> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        let conn = db.connection();

        let current = Self::fetch(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            tracing::debug!(operation = %id, status = %current.status, "Ignoring failure for terminal operation");
            return Ok(current);
        }

        let retry_count = current.retry_count.saturating_add(1);
        let exhausted = permanent || retry_count >= self.policy.max_retries;

        // Compare-and-set on retry_count so each attempt increments exactly once
        let updated = if exhausted {
            conn.execute(
                "UPDATE sync_operations
                 SET status = 'failed', retry_count = ?1, last_error = ?2, next_retry_at = NULL
                 WHERE id = ?3 AND status = 'pending' AND retry_count = ?4",
                libsql::params![
                    i64::from(retry_count),
                    error.to_string(),
                    id.as_str(),
                    i64::from(current.retry_count)
                ],
            )
            .await?
        } else {
            let next_retry_at = now + self.policy.backoff(retry_count);
            conn.execute(
                "UPDATE sync_operations
                 SET retry_count = ?1, last_error = ?2, next_retry_at = ?3
                 WHERE id = ?4 AND status = 'pending' AND retry_count = ?5",
                libsql::params![
                    i64::from(retry_count),
                    error.to_string(),
                    next_retry_at.timestamp_millis(),
                    id.as_str(),
                    i64::from(current.retry_count)
                ],
            )
            .await?
        };

        let operation = Self::fetch(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if updated == 0 {
            return Ok(operation);
        }

        if exhausted {
            tracing::warn!(
                operation = %id,
                operation_type = %operation.operation_type,
                retry_count,
                permanent,
                error,
                "Sync operation failed permanently; manual recovery required"
            );
        } else {
            tracing::info!(
                operation = %id,
                retry_count,
                next_retry_at = ?operation.next_retry_at,
                error,
                "Sync operation scheduled for retry"
            );
        }
        Ok(operation)
    }

    /// Delete completed entries, returning how many were removed
    pub async fn clear_completed(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let removed = db
            .connection()
            .execute("DELETE FROM sync_operations WHERE status = 'completed'", ())
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "Cleared completed sync operations");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now().timestamp_millis();
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT
                    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'pending' AND next_retry_at <= ?1 THEN 1 ELSE 0 END), 0)
                 FROM sync_operations",
                libsql::params![now],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(QueueStats::default());
        };
        Ok(QueueStats {
            pending_count: count_column(&row, 0)?,
            failed_count: count_column(&row, 1)?,
            completed_count: count_column(&row, 2)?,
            due_count: count_column(&row, 3)?,
        })
    }

    /// Entries that need manual recovery, oldest first
    pub async fn failed_operations(&self) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM sync_operations
             WHERE status = 'failed'
             ORDER BY created_at ASC, id ASC"
        );
        let mut rows = db.connection().query(&sql, ()).await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(parse_operation(&row)?);
        }
        Ok(operations)
    }

    /// Take or renew the scheduler lease for `holder` until `now + ttl`.
    ///
    /// Returns `false` while another holder's lease is still live. The lease
    /// lives in the queue database, so it is shared by every process that
    /// opens the same file.
    pub async fn try_acquire_lease(&self, holder: &str, ttl: chrono::Duration) -> Result<bool> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        let updated = db
            .connection()
            .execute(
                "UPDATE scheduler_lease SET holder = ?1, expires_at = ?2
                 WHERE id = 1 AND (holder IS NULL OR holder = ?1 OR expires_at < ?3)",
                libsql::params![
                    holder,
                    (now + ttl).timestamp_millis(),
                    now.timestamp_millis()
                ],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Give the lease up if `holder` still owns it
    pub async fn release_lease(&self, holder: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "UPDATE scheduler_lease SET holder = NULL, expires_at = 0
                 WHERE id = 1 AND holder = ?1",
                libsql::params![holder],
            )
            .await?;
        Ok(())
    }

    async fn fetch(conn: &libsql::Connection, id: &OperationId) -> Result<Option<SyncOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM sync_operations WHERE id = ?1");
        let mut rows = conn.query(&sql, libsql::params![id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_operation(&row)?)),
            None => Ok(None),
        }
    }
}

fn parse_operation(row: &Row) -> Result<SyncOperation> {
    let id: String = row.get(0)?;
    let operation_type: String = row.get(1)?;
    let status: String = row.get(5)?;
    let retry_count: i64 = row.get(6)?;

    Ok(SyncOperation {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("invalid operation id: {id}")))?,
        operation_type: operation_type.parse().map_err(Error::Database)?,
        owner_id: row.get(2)?,
        payload: row.get(3)?,
        endpoint: row.get(4)?,
        status: status.parse().map_err(Error::Database)?,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| Error::Database(format!("invalid retry count: {retry_count}")))?,
        last_error: row.get(7)?,
        created_at: millis_to_datetime(row.get(8)?)?,
        next_retry_at: row
            .get::<Option<i64>>(9)?
            .map(millis_to_datetime)
            .transpose()?,
        completed_at: row
            .get::<Option<i64>>(10)?
            .map(millis_to_datetime)
            .transpose()?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Database(format!("invalid timestamp: {millis}")))
}

fn count_column(row: &Row, idx: i32) -> Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(u64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests;
