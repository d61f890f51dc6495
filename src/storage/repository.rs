use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

// ── Settings ───────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(count > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync Runs ──────────────────────────────────────────────────────

/// One row of the run ledger.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub trigger: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub tasks: i64,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub retained: i64,
    pub error_message: Option<String>,
}

/// Counts written when a run finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounts {
    pub tasks: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub retained: usize,
}

pub fn insert_sync_run(conn: &Connection, trigger: &str) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (trigger, status, started_at)
         VALUES (?1, 'running', datetime('now'))",
        params![trigger],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_sync_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    counts: &RunCounts,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            status = ?2, completed_at = datetime('now'),
            tasks = ?3, created = ?4, updated = ?5, deleted = ?6, retained = ?7,
            error_message = ?8
         WHERE id = ?1",
        params![
            run_id,
            status,
            counts.tasks as i64,
            counts.created as i64,
            counts.updated as i64,
            counts.deleted as i64,
            counts.retained as i64,
            error_message,
        ],
    )?;
    Ok(())
}

/// Most recent runs first.
pub fn list_recent_runs(conn: &Connection, limit: u32) -> Result<Vec<SyncRun>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, trigger, status, started_at, completed_at,
                tasks, created, updated, deleted, retained, error_message
         FROM sync_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SyncRun {
            id: row.get(0)?,
            trigger: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            tasks: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
            deleted: row.get(8)?,
            retained: row.get(9)?,
            error_message: row.get(10)?,
        })
    })?;
    rows.collect()
}

/// Start time of the most recent run that did not fail.
pub fn last_successful_run_at(conn: &Connection) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT MAX(started_at) FROM sync_runs
         WHERE status IN ('completed', 'partial_failure')",
        [],
        |row| row.get(0),
    )
}
