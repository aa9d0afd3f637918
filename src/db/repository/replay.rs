//! Repository functions for one-time-use reservations.

use rusqlite::{params, Connection};

use crate::db::DatabaseError;

/// Claim `scope_key` until `expires_at_ms`.
///
/// Insert-if-absent as one statement: an existing row is only overwritten when
/// it has already expired at `now_ms`. Returns `true` when this call made the
/// reservation, `false` when an unexpired reservation already exists.
pub fn claim_reservation(
    conn: &Connection,
    scope_key: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO replay_reservations (scope_key, expires_at_ms) VALUES (?1, ?2)
         ON CONFLICT(scope_key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
         WHERE replay_reservations.expires_at_ms <= ?3",
        params![scope_key, expires_at_ms, now_ms],
    )?;
    Ok(changed == 1)
}

/// Whether `scope_key` is currently reserved.
pub fn is_reserved(conn: &Connection, scope_key: &str, now_ms: i64) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM replay_reservations WHERE scope_key = ?1 AND expires_at_ms > ?2",
        params![scope_key, now_ms],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Drop reservations that expired at or before `now_ms`. Returns rows removed.
pub fn purge_expired_reservations(conn: &Connection, now_ms: i64) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM replay_reservations WHERE expires_at_ms <= ?1",
        params![now_ms],
    )?;
    Ok(removed)
}
