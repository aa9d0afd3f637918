//! Repository functions for idempotency locks, cached results and body bindings.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;

/// A completed response stored under a scoped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResultRow {
    pub status: u16,
    pub headers_json: String,
    pub body: Vec<u8>,
}

/// Fetch the cached result for `scoped_key`, ignoring locks and expired rows.
pub fn get_completed_result(
    conn: &Connection,
    scoped_key: &str,
    now_ms: i64,
) -> Result<Option<StoredResultRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT status, headers_json, body FROM idempotency_entries
             WHERE scoped_key = ?1 AND state = 'completed' AND expires_at_ms > ?2",
            params![scoped_key, now_ms],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((status, headers_json, body)) = row else {
        return Ok(None);
    };
    let status = status
        .and_then(|s| u16::try_from(s).ok())
        .ok_or(DatabaseError::CorruptColumn {
            column: "idempotency_entries.status",
            reason: "completed entry without a valid status".into(),
        })?;
    Ok(Some(StoredResultRow {
        status,
        headers_json: headers_json.unwrap_or_else(|| "{}".to_string()),
        body: body.unwrap_or_default(),
    }))
}

/// Take the execution lock for `scoped_key`.
///
/// Succeeds only when no unexpired entry (locked or completed) exists.
pub fn acquire_idempotency_lock(
    conn: &Connection,
    scoped_key: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO idempotency_entries (scoped_key, state, expires_at_ms)
         VALUES (?1, 'locked', ?2)
         ON CONFLICT(scoped_key) DO UPDATE SET
             state = 'locked', status = NULL, headers_json = NULL, body = NULL,
             expires_at_ms = excluded.expires_at_ms
         WHERE idempotency_entries.expires_at_ms <= ?3",
        params![scoped_key, expires_at_ms, now_ms],
    )?;
    Ok(changed == 1)
}

/// Record the final result for `scoped_key`, replacing the lock.
pub fn store_completed_result(
    conn: &Connection,
    scoped_key: &str,
    result: &StoredResultRow,
    expires_at_ms: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO idempotency_entries (scoped_key, state, status, headers_json, body, expires_at_ms)
         VALUES (?1, 'completed', ?2, ?3, ?4, ?5)
         ON CONFLICT(scoped_key) DO UPDATE SET
             state = 'completed', status = excluded.status,
             headers_json = excluded.headers_json, body = excluded.body,
             expires_at_ms = excluded.expires_at_ms",
        params![
            scoped_key,
            result.status as i64,
            result.headers_json,
            result.body,
            expires_at_ms
        ],
    )?;
    Ok(())
}

/// Release a lock that never produced a result. Completed entries are kept.
pub fn release_idempotency_lock(conn: &Connection, scoped_key: &str) -> Result<bool, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM idempotency_entries WHERE scoped_key = ?1 AND state = 'locked'",
        params![scoped_key],
    )?;
    Ok(removed > 0)
}

/// Bind `binding_key` to `body_hash`.
///
/// Returns `true` when the key is now bound to this hash (fresh binding, expired
/// binding replaced, or the same hash bound before) and `false` when an unexpired
/// binding holds a different hash. An existing matching binding keeps its expiry.
pub fn bind_request_body(
    conn: &Connection,
    binding_key: &str,
    body_hash: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO idempotency_bindings (binding_key, body_hash, expires_at_ms)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(binding_key) DO UPDATE SET
             body_hash = excluded.body_hash,
             expires_at_ms = CASE
                 WHEN idempotency_bindings.expires_at_ms <= ?4 THEN excluded.expires_at_ms
                 ELSE idempotency_bindings.expires_at_ms
             END
         WHERE idempotency_bindings.expires_at_ms <= ?4
            OR idempotency_bindings.body_hash = excluded.body_hash",
        params![binding_key, body_hash, expires_at_ms, now_ms],
    )?;
    Ok(changed == 1)
}

/// Remove expired entries and bindings. Returns total rows removed.
pub fn purge_expired_idempotency(conn: &Connection, now_ms: i64) -> Result<usize, DatabaseError> {
    let entries = conn.execute(
        "DELETE FROM idempotency_entries WHERE expires_at_ms <= ?1",
        params![now_ms],
    )?;
    let bindings = conn.execute(
        "DELETE FROM idempotency_bindings WHERE expires_at_ms <= ?1",
        params![now_ms],
    )?;
    Ok(entries + bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn sample_result() -> StoredResultRow {
        StoredResultRow {
            status: 201,
            headers_json: r#"{"content-type":"application/json"}"#.into(),
            body: br#"{"ok":true}"#.to_vec(),
        }
    }

    #[test]
    fn lock_is_exclusive_until_released() {
        let conn = open_memory_database().unwrap();
        assert!(acquire_idempotency_lock(&conn, "s1", 0, 1_000).unwrap());
        assert!(!acquire_idempotency_lock(&conn, "s1", 10, 1_010).unwrap());
        assert!(release_idempotency_lock(&conn, "s1").unwrap());
        assert!(acquire_idempotency_lock(&conn, "s1", 20, 1_020).unwrap());
    }

    #[test]
    fn completed_result_blocks_lock_and_survives_release() {
        let conn = open_memory_database().unwrap();
        assert!(acquire_idempotency_lock(&conn, "s1", 0, 1_000).unwrap());
        store_completed_result(&conn, "s1", &sample_result(), 1_000).unwrap();

        assert!(!release_idempotency_lock(&conn, "s1").unwrap());
        assert!(!acquire_idempotency_lock(&conn, "s1", 10, 1_010).unwrap());
        assert_eq!(
            get_completed_result(&conn, "s1", 10).unwrap(),
            Some(sample_result())
        );
    }

    #[test]
    fn locked_entry_has_no_result() {
        let conn = open_memory_database().unwrap();
        acquire_idempotency_lock(&conn, "s1", 0, 1_000).unwrap();
        assert_eq!(get_completed_result(&conn, "s1", 10).unwrap(), None);
    }

    #[test]
    fn expired_entry_is_absent() {
        let conn = open_memory_database().unwrap();
        acquire_idempotency_lock(&conn, "s1", 0, 1_000).unwrap();
        store_completed_result(&conn, "s1", &sample_result(), 1_000).unwrap();
        assert_eq!(get_completed_result(&conn, "s1", 1_000).unwrap(), None);
        assert!(acquire_idempotency_lock(&conn, "s1", 1_000, 2_000).unwrap());
    }

    #[test]
    fn binding_rejects_different_hash() {
        let conn = open_memory_database().unwrap();
        assert!(bind_request_body(&conn, "b", "hash-a", 0, 1_000).unwrap());
        assert!(bind_request_body(&conn, "b", "hash-a", 5, 1_005).unwrap());
        assert!(!bind_request_body(&conn, "b", "hash-b", 5, 1_005).unwrap());
        // after expiry a new body may bind
        assert!(bind_request_body(&conn, "b", "hash-b", 1_000, 2_000).unwrap());
    }

    #[test]
    fn purge_counts_entries_and_bindings() {
        let conn = open_memory_database().unwrap();
        acquire_idempotency_lock(&conn, "s1", 0, 100).unwrap();
        bind_request_body(&conn, "b1", "h", 0, 100).unwrap();
        acquire_idempotency_lock(&conn, "s2", 0, 10_000).unwrap();
        assert_eq!(purge_expired_idempotency(&conn, 100).unwrap(), 2);
    }
}
