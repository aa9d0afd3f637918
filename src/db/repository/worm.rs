//! Repository functions for the WORM audit chain and its per-tenant state row.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

/// A stored WORM audit row. Serializes to the export line format; absent
/// optional columns are omitted rather than written as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WormRow {
    pub tenant_id: String,
    pub seq: i64,
    pub ts: String,
    pub action: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

/// `audit_chain_state` row: the tail of a tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStateRow {
    pub last_seq: i64,
    pub last_hash: String,
}

const WORM_COLUMNS: &str =
    "tenant_id, seq, ts, action, result, device_id, card_id, jti, correlation_id, prev_hash, hash";

fn map_worm(row: &Row<'_>) -> rusqlite::Result<WormRow> {
    Ok(WormRow {
        tenant_id: row.get(0)?,
        seq: row.get(1)?,
        ts: row.get(2)?,
        action: row.get(3)?,
        result: row.get(4)?,
        device_id: row.get(5)?,
        card_id: row.get(6)?,
        jti: row.get(7)?,
        correlation_id: row.get(8)?,
        prev_hash: row.get(9)?,
        hash: row.get(10)?,
    })
}

// ═══════════════════════════════════════════════════════════
// Chain state
// ═══════════════════════════════════════════════════════════

/// Create `(0, "")` state for a tenant if none exists.
pub fn ensure_chain_state(conn: &Connection, tenant_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_chain_state (tenant_id, last_seq, last_hash) VALUES (?1, 0, '')
         ON CONFLICT(tenant_id) DO NOTHING",
        params![tenant_id],
    )?;
    Ok(())
}

pub fn get_chain_state(conn: &Connection, tenant_id: &str) -> Result<Option<ChainStateRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT last_seq, last_hash FROM audit_chain_state WHERE tenant_id = ?1",
            params![tenant_id],
            |row| {
                Ok(ChainStateRow {
                    last_seq: row.get(0)?,
                    last_hash: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Advance the chain tail from `seq - 1` to `seq`. Returns `false` if the stored
/// tail was not at `seq - 1`.
pub fn advance_chain_state(
    conn: &Connection,
    tenant_id: &str,
    seq: i64,
    hash: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE audit_chain_state SET last_seq = ?2, last_hash = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND last_seq = ?2 - 1",
        params![tenant_id, seq, hash, updated_at],
    )?;
    Ok(updated == 1)
}

/// Tenants that have appended at least one event.
pub fn list_audit_tenants(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT tenant_id FROM audit_chain_state WHERE last_seq > 0 ORDER BY tenant_id",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ═══════════════════════════════════════════════════════════
// WORM rows
// ═══════════════════════════════════════════════════════════

pub fn insert_worm_row(conn: &Connection, row: &WormRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log_worm
             (tenant_id, seq, ts, action, result, device_id, card_id, jti, correlation_id, prev_hash, hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.tenant_id,
            row.seq,
            row.ts,
            row.action,
            row.result,
            row.device_id,
            row.card_id,
            row.jti,
            row.correlation_id,
            row.prev_hash,
            row.hash,
        ],
    )?;
    Ok(())
}

/// Rows `from_seq..=to_seq` for a tenant, in sequence order.
pub fn list_worm_rows(
    conn: &Connection,
    tenant_id: &str,
    from_seq: i64,
    to_seq: i64,
) -> Result<Vec<WormRow>, DatabaseError> {
    let sql = format!(
        "SELECT {WORM_COLUMNS} FROM audit_log_worm
         WHERE tenant_id = ?1 AND seq BETWEEN ?2 AND ?3 ORDER BY seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id, from_seq, to_seq], map_worm)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_worm_row(conn: &Connection, tenant_id: &str, seq: i64) -> Result<Option<WormRow>, DatabaseError> {
    let sql = format!("SELECT {WORM_COLUMNS} FROM audit_log_worm WHERE tenant_id = ?1 AND seq = ?2");
    let row = conn
        .query_row(&sql, params![tenant_id, seq], map_worm)
        .optional()?;
    Ok(row)
}

/// Delete rows older than `cutoff_ts` whose seq is at most `max_seq`.
/// `ts` is stored as fixed-width RFC 3339 UTC, so text comparison orders by time.
pub fn delete_worm_rows_before(
    conn: &Connection,
    tenant_id: &str,
    cutoff_ts: &str,
    max_seq: i64,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM audit_log_worm WHERE tenant_id = ?1 AND ts < ?2 AND seq <= ?3",
        params![tenant_id, cutoff_ts, max_seq],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn row(seq: i64, prev: &str, hash: &str) -> WormRow {
        WormRow {
            tenant_id: "t1".into(),
            seq,
            ts: format!("2026-01-01T00:00:0{seq}.000Z"),
            action: "stamp.claim".into(),
            result: "ok".into(),
            device_id: Some("dev-1".into()),
            card_id: None,
            jti: None,
            correlation_id: None,
            prev_hash: prev.into(),
            hash: hash.into(),
        }
    }

    #[test]
    fn chain_state_initializes_once() {
        let conn = open_memory_database().unwrap();
        ensure_chain_state(&conn, "t1").unwrap();
        assert!(advance_chain_state(&conn, "t1", 1, "h1", "now").unwrap());
        ensure_chain_state(&conn, "t1").unwrap();
        let state = get_chain_state(&conn, "t1").unwrap().unwrap();
        assert_eq!(state.last_seq, 1);
        assert_eq!(state.last_hash, "h1");
    }

    #[test]
    fn advance_requires_contiguous_seq() {
        let conn = open_memory_database().unwrap();
        ensure_chain_state(&conn, "t1").unwrap();
        assert!(!advance_chain_state(&conn, "t1", 2, "h2", "now").unwrap());
    }

    #[test]
    fn rows_listed_in_order() {
        let conn = open_memory_database().unwrap();
        insert_worm_row(&conn, &row(2, "h1", "h2")).unwrap();
        insert_worm_row(&conn, &row(1, "", "h1")).unwrap();
        let rows = list_worm_rows(&conn, "t1", 1, 10).unwrap();
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(rows[0].device_id.as_deref(), Some("dev-1"));
        assert!(get_worm_row(&conn, "t1", 3).unwrap().is_none());
    }

    #[test]
    fn duplicate_seq_rejected() {
        let conn = open_memory_database().unwrap();
        insert_worm_row(&conn, &row(1, "", "h1")).unwrap();
        assert!(insert_worm_row(&conn, &row(1, "", "other")).is_err());
    }

    #[test]
    fn tenants_without_events_not_listed() {
        let conn = open_memory_database().unwrap();
        ensure_chain_state(&conn, "empty").unwrap();
        ensure_chain_state(&conn, "t1").unwrap();
        advance_chain_state(&conn, "t1", 1, "h1", "now").unwrap();
        assert_eq!(list_audit_tenants(&conn).unwrap(), vec!["t1".to_string()]);
    }

    #[test]
    fn export_line_omits_absent_fields() {
        let json = serde_json::to_value(row(1, "", "h1")).unwrap();
        assert!(json.get("card_id").is_none());
        assert_eq!(json["device_id"], "dev-1");
    }
}
