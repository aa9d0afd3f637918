//! Repository functions for the per-tenant device registry.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;

// ═══════════════════════════════════════════════════════════
// Device CRUD
// ═══════════════════════════════════════════════════════════

/// A row from the `devices` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub tenant_id: String,
    pub device_id: String,
    /// Standard base64 of the 32-byte Ed25519 public key.
    pub public_key: String,
    pub algorithm: String,
    pub enabled: bool,
    pub created_at: String,
}

const DEVICE_COLUMNS: &str =
    "tenant_id, device_id, public_key, algorithm, enabled, created_at";

fn map_device(row: &Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        tenant_id: row.get(0)?,
        device_id: row.get(1)?,
        public_key: row.get(2)?,
        algorithm: row.get(3)?,
        enabled: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
    })
}

/// Register a device. Fails with a constraint error if it already exists.
pub fn insert_device(
    conn: &Connection,
    tenant_id: &str,
    device_id: &str,
    public_key: &str,
    enabled: bool,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO devices (tenant_id, device_id, public_key, algorithm, enabled)
         VALUES (?1, ?2, ?3, 'ed25519', ?4)",
        params![tenant_id, device_id, public_key, enabled as i32],
    )?;
    Ok(())
}

/// Get a device by tenant and id.
pub fn get_device(
    conn: &Connection,
    tenant_id: &str,
    device_id: &str,
) -> Result<Option<DeviceRow>, DatabaseError> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = ?1 AND device_id = ?2");
    let row = conn
        .query_row(&sql, params![tenant_id, device_id], map_device)
        .optional()?;
    Ok(row)
}

/// Get every device registered under `device_id`, across tenants.
pub fn find_devices_by_key(conn: &Connection, device_id: &str) -> Result<Vec<DeviceRow>, DatabaseError> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1 ORDER BY tenant_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![device_id], map_device)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Toggle the enabled flag. Returns `false` if the device does not exist.
pub fn set_device_enabled(
    conn: &Connection,
    tenant_id: &str,
    device_id: &str,
    enabled: bool,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE devices SET enabled = ?3 WHERE tenant_id = ?1 AND device_id = ?2",
        params![tenant_id, device_id, enabled as i32],
    )?;
    Ok(updated > 0)
}

/// List devices for a tenant, oldest first.
pub fn list_devices_for_tenant(conn: &Connection, tenant_id: &str) -> Result<Vec<DeviceRow>, DatabaseError> {
    let sql = format!(
        "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = ?1 ORDER BY created_at, device_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id], map_device)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
