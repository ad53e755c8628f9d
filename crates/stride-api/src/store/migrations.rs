//! Record store migrations

use libsql::Connection;

use super::StoreError;

const CURRENT_VERSION: i32 = 1;

pub async fn run(conn: &Connection) -> Result<(), StoreError> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, V1_STATEMENTS).await?;
    }

    Ok(())
}

async fn get_version(conn: &Connection) -> Result<i32, StoreError> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;
    let exists = match rows.next().await? {
        Some(row) => row.get::<i32>(0)? != 0,
        None => false,
    };
    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Version 1: owners, records, audit log
const V1_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS owners (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES owners(id),
        kind TEXT NOT NULL,
        origin_id TEXT,
        scope TEXT NOT NULL DEFAULT '',
        start_at INTEGER NOT NULL,
        end_at INTEGER,
        duration_secs REAL NOT NULL,
        payload TEXT NOT NULL,
        warnings TEXT,
        created_at INTEGER NOT NULL
    )",
    // Storage-level backstop for exact deduplication
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_origin
        ON records(owner_id, kind, origin_id) WHERE origin_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_records_window
        ON records(owner_id, kind, scope, start_at)",
    "CREATE TABLE IF NOT EXISTS ingest_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        origin_id TEXT,
        record_index INTEGER NOT NULL,
        event TEXT NOT NULL CHECK (event IN ('warning', 'duplicate')),
        field TEXT,
        message TEXT NOT NULL,
        matched_record_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ingest_audit_owner
        ON ingest_audit(owner_id, created_at DESC)",
];

async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<(), StoreError> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            libsql::params![version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated record store to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}
