//! Repository functions for audit export run bookkeeping.

use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportRunStatus {
    Started,
    Success,
    Failed,
}

impl ExportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportRunStatus::Started => "STARTED",
            ExportRunStatus::Success => "SUCCESS",
            ExportRunStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ExportRunStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            _ => Err(DatabaseError::InvalidEnum {
                field: "ExportRunStatus".into(),
                value: s.into(),
            }),
        }
    }
}

/// A row from `audit_export_runs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRunRow {
    pub run_id: String,
    pub tenant_id: String,
    pub from_seq: i64,
    pub to_seq: i64,
    pub status: ExportRunStatus,
    pub exported_at: Option<String>,
    pub object_key: Option<String>,
    pub error_code: Option<String>,
    pub error_message_sanitized: Option<String>,
}

const RUN_COLUMNS: &str = "run_id, tenant_id, from_seq, to_seq, status, exported_at, object_key, \
                           error_code, error_message_sanitized";

fn map_run(row: &Row<'_>) -> rusqlite::Result<(ExportRunRow, String)> {
    let status: String = row.get(4)?;
    Ok((
        ExportRunRow {
            run_id: row.get(0)?,
            tenant_id: row.get(1)?,
            from_seq: row.get(2)?,
            to_seq: row.get(3)?,
            status: ExportRunStatus::Started,
            exported_at: row.get(5)?,
            object_key: row.get(6)?,
            error_code: row.get(7)?,
            error_message_sanitized: row.get(8)?,
        },
        status,
    ))
}

fn with_status((mut run, status): (ExportRunRow, String)) -> Result<ExportRunRow, DatabaseError> {
    run.status = status.parse()?;
    Ok(run)
}

/// Start a run for `[from_seq, to_seq]`. Returns `false` when a STARTED or
/// SUCCESS run for the exact same range already exists. FAILED runs do not
/// block a retry.
pub fn create_export_run(
    conn: &Connection,
    run_id: &str,
    tenant_id: &str,
    from_seq: i64,
    to_seq: i64,
    started_at: &str,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT INTO audit_export_runs (run_id, tenant_id, from_seq, to_seq, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'STARTED', ?5)
         ON CONFLICT(tenant_id, from_seq, to_seq) WHERE status <> 'FAILED' DO NOTHING",
        params![run_id, tenant_id, from_seq, to_seq, started_at],
    )?;
    Ok(inserted == 1)
}

/// STARTED → SUCCESS. Returns `false` if the run was not in STARTED.
pub fn mark_export_success(
    conn: &Connection,
    run_id: &str,
    exported_at: &str,
    object_key: &str,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE audit_export_runs SET status = 'SUCCESS', exported_at = ?2, object_key = ?3
         WHERE run_id = ?1 AND status = 'STARTED'",
        params![run_id, exported_at, object_key],
    )?;
    Ok(updated == 1)
}

/// STARTED → FAILED. Returns `false` if the run was not in STARTED.
pub fn mark_export_failed(
    conn: &Connection,
    run_id: &str,
    error_code: &str,
    error_message_sanitized: &str,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE audit_export_runs SET status = 'FAILED', error_code = ?2, error_message_sanitized = ?3
         WHERE run_id = ?1 AND status = 'STARTED'",
        params![run_id, error_code, error_message_sanitized],
    )?;
    Ok(updated == 1)
}

/// How far a tenant's chain is exported without holes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportProgress {
    /// Highest seq such that every seq in `1..=exported_through` is covered
    /// by a SUCCESS run. 0 when seq 1 is not exported.
    pub exported_through: i64,
    /// Latest `exported_at` among the runs inside that prefix.
    pub last_exported_at: Option<String>,
}

/// Contiguous export watermark. A SUCCESS run past a hole does not count.
pub fn get_export_progress(conn: &Connection, tenant_id: &str) -> Result<ExportProgress, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT from_seq, to_seq, exported_at FROM audit_export_runs
         WHERE tenant_id = ?1 AND status = 'SUCCESS'
         ORDER BY from_seq, to_seq",
    )?;
    let runs = stmt
        .query_map(params![tenant_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut progress = ExportProgress::default();
    for (from_seq, to_seq, exported_at) in runs {
        if from_seq > progress.exported_through + 1 {
            break;
        }
        progress.exported_through = progress.exported_through.max(to_seq);
        if exported_at > progress.last_exported_at {
            progress.last_exported_at = exported_at;
        }
    }
    Ok(progress)
}

/// STARTED runs created before `cutoff` are treated as abandoned and moved
/// to FAILED so their range can be retried. Returns the number of runs moved.
pub fn fail_stale_export_runs(
    conn: &Connection,
    tenant_id: &str,
    cutoff: &str,
    error_code: &str,
    error_message_sanitized: &str,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE audit_export_runs SET status = 'FAILED', error_code = ?3, error_message_sanitized = ?4
         WHERE tenant_id = ?1 AND status = 'STARTED' AND created_at < ?2",
        params![tenant_id, cutoff, error_code, error_message_sanitized],
    )?;
    Ok(updated)
}

pub fn get_export_run(conn: &Connection, run_id: &str) -> Result<Option<ExportRunRow>, DatabaseError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM audit_export_runs WHERE run_id = ?1");
    let row = conn.query_row(&sql, params![run_id], map_run).optional()?;
    row.map(with_status).transpose()
}

pub fn list_export_runs(conn: &Connection, tenant_id: &str) -> Result<Vec<ExportRunRow>, DatabaseError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM audit_export_runs WHERE tenant_id = ?1 ORDER BY from_seq, created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id], map_run)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(with_status).collect()
}
