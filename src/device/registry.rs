//! Device registry: (tenant, device) → public key, algorithm and enabled flag.
//!
//! Public keys are immutable; rotating a key means registering a new device.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{decode_base64_lenient, DeviceError};
use crate::db::{repository, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAlgorithm {
    Ed25519,
}

impl DeviceAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAlgorithm::Ed25519 => "ed25519",
        }
    }
}

impl FromStr for DeviceAlgorithm {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(DeviceAlgorithm::Ed25519),
            other => Err(DeviceError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub tenant_id: String,
    pub device_id: String,
    /// Base64 of the raw 32-byte Ed25519 public key.
    pub public_key: String,
    pub algorithm: DeviceAlgorithm,
    pub enabled: bool,
}

pub trait DeviceRegistry: Send + Sync {
    fn find_by_id(&self, tenant_id: &str, device_id: &str) -> Result<Option<DeviceRecord>, DeviceError>;

    /// Lookup without tenant context. Device ids are expected to be globally
    /// unique; an id registered under several tenants resolves to nothing.
    fn find_by_key(&self, device_key: &str) -> Result<Option<DeviceRecord>, DeviceError>;
}

fn check_public_key(public_key: &str) -> Result<(), DeviceError> {
    match decode_base64_lenient(public_key) {
        Some(bytes) if bytes.len() == ed25519_dalek::PUBLIC_KEY_LENGTH => Ok(()),
        _ => Err(DeviceError::InvalidPublicKey),
    }
}

fn single_match(mut matches: Vec<DeviceRecord>, device_key: &str) -> Option<DeviceRecord> {
    if matches.len() > 1 {
        tracing::warn!(device_id = device_key, tenants = matches.len(), "Device id registered under several tenants");
        return None;
    }
    matches.pop()
}

// ═══════════════════════════════════════════════════════════
// In-memory registry
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryDeviceRegistry {
    devices: Mutex<HashMap<(String, String), DeviceRecord>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. An existing record keeps its key; only `enabled` is updated.
    pub fn upsert(&self, record: DeviceRecord) -> Result<(), DeviceError> {
        check_public_key(&record.public_key)?;
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| DeviceError::Unavailable("registry lock poisoned".into()))?;
        let key = (record.tenant_id.clone(), record.device_id.clone());
        match devices.get_mut(&key) {
            Some(existing) => existing.enabled = record.enabled,
            None => {
                devices.insert(key, record);
            }
        }
        Ok(())
    }

    pub fn set_enabled(&self, tenant_id: &str, device_id: &str, enabled: bool) -> Result<bool, DeviceError> {
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| DeviceError::Unavailable("registry lock poisoned".into()))?;
        match devices.get_mut(&(tenant_id.to_string(), device_id.to_string())) {
            Some(record) => {
                record.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl DeviceRegistry for MemoryDeviceRegistry {
    fn find_by_id(&self, tenant_id: &str, device_id: &str) -> Result<Option<DeviceRecord>, DeviceError> {
        let devices = self
            .devices
            .lock()
            .map_err(|_| DeviceError::Unavailable("registry lock poisoned".into()))?;
        Ok(devices
            .get(&(tenant_id.to_string(), device_id.to_string()))
            .cloned())
    }

    fn find_by_key(&self, device_key: &str) -> Result<Option<DeviceRecord>, DeviceError> {
        let devices = self
            .devices
            .lock()
            .map_err(|_| DeviceError::Unavailable("registry lock poisoned".into()))?;
        let matches: Vec<DeviceRecord> = devices
            .values()
            .filter(|d| d.device_id == device_key)
            .cloned()
            .collect();
        Ok(single_match(matches, device_key))
    }
}

// ═══════════════════════════════════════════════════════════
// SQLite registry
// ═══════════════════════════════════════════════════════════

pub struct SqliteDeviceRegistry {
    db: Arc<Database>,
}

impl SqliteDeviceRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Confirm onboarding of a device with its public key.
    pub fn register(&self, tenant_id: &str, device_id: &str, public_key: &str) -> Result<(), DeviceError> {
        check_public_key(public_key)?;
        self.db
            .with_conn(|conn| repository::insert_device(conn, tenant_id, device_id, public_key, true))?;
        tracing::info!(tenant_id, device_id, "Device registered");
        Ok(())
    }

    pub fn set_enabled(&self, tenant_id: &str, device_id: &str, enabled: bool) -> Result<bool, DeviceError> {
        let updated = self
            .db
            .with_conn(|conn| repository::set_device_enabled(conn, tenant_id, device_id, enabled))?;
        if updated {
            tracing::info!(tenant_id, device_id, enabled, "Device enabled flag changed");
        }
        Ok(updated)
    }
}

fn record_from_row(row: repository::DeviceRow) -> Result<DeviceRecord, DeviceError> {
    Ok(DeviceRecord {
        algorithm: row.algorithm.parse()?,
        tenant_id: row.tenant_id,
        device_id: row.device_id,
        public_key: row.public_key,
        enabled: row.enabled,
    })
}

impl DeviceRegistry for SqliteDeviceRegistry {
    fn find_by_id(&self, tenant_id: &str, device_id: &str) -> Result<Option<DeviceRecord>, DeviceError> {
        let row = self
            .db
            .with_conn(|conn| repository::get_device(conn, tenant_id, device_id))?;
        row.map(record_from_row).transpose()
    }

    fn find_by_key(&self, device_key: &str) -> Result<Option<DeviceRecord>, DeviceError> {
        let rows = self
            .db
            .with_conn(|conn| repository::find_devices_by_key(conn, device_key))?;
        let records = rows
            .into_iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(single_match(records, device_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn key_b64(seed: u8) -> String {
        let signing = ed25519_dalek::SigningKey::from_bytes(&[seed; 32]);
        base64::engine::general_purpose::STANDARD.encode(signing.verifying_key().as_bytes())
    }

    fn record(tenant: &str, device: &str) -> DeviceRecord {
        DeviceRecord {
            tenant_id: tenant.into(),
            device_id: device.into(),
            public_key: key_b64(7),
            algorithm: DeviceAlgorithm::Ed25519,
            enabled: true,
        }
    }

    #[test]
    fn memory_registry_lookup() {
        let registry = MemoryDeviceRegistry::new();
        registry.upsert(record("t1", "dev-1")).unwrap();
        assert!(registry.find_by_id("t1", "dev-1").unwrap().is_some());
        assert!(registry.find_by_id("t2", "dev-1").unwrap().is_none());
        assert_eq!(registry.find_by_key("dev-1").unwrap().unwrap().tenant_id, "t1");
    }

    #[test]
    fn memory_upsert_keeps_original_key() {
        let registry = MemoryDeviceRegistry::new();
        registry.upsert(record("t1", "dev-1")).unwrap();
        let mut rotated = record("t1", "dev-1");
        rotated.public_key = key_b64(9);
        rotated.enabled = false;
        registry.upsert(rotated).unwrap();

        let stored = registry.find_by_id("t1", "dev-1").unwrap().unwrap();
        assert_eq!(stored.public_key, key_b64(7));
        assert!(!stored.enabled);
    }

    #[test]
    fn ambiguous_key_resolves_to_none() {
        let registry = MemoryDeviceRegistry::new();
        registry.upsert(record("t1", "dev-1")).unwrap();
        registry.upsert(record("t2", "dev-1")).unwrap();
        assert!(registry.find_by_key("dev-1").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_public_key() {
        let registry = MemoryDeviceRegistry::new();
        let mut bad = record("t1", "dev-1");
        bad.public_key = "c2hvcnQ=".into();
        assert!(matches!(registry.upsert(bad), Err(DeviceError::InvalidPublicKey)));
    }

    #[test]
    fn sqlite_registry_round_trip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = SqliteDeviceRegistry::new(db);
        registry.register("t1", "dev-1", &key_b64(7)).unwrap();

        let found = registry.find_by_id("t1", "dev-1").unwrap().unwrap();
        assert_eq!(found.algorithm, DeviceAlgorithm::Ed25519);
        assert!(found.enabled);

        assert!(registry.set_enabled("t1", "dev-1", false).unwrap());
        assert!(!registry.find_by_key("dev-1").unwrap().unwrap().enabled);
        assert!(registry.find_by_key("unknown").unwrap().is_none());
    }
}
