//! One-time-use reservations ("claim once") for device nonces and business JTIs.
//!
//! A claim is insert-if-absent with expiry, performed as a single atomic step by
//! the backing store. Expired reservations are logically absent and may be
//! claimed again. Whether a store failure rejects or admits the request is the
//! caller's decision, see [`crate::policy`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::clock::{epoch_millis, Clock};
use crate::db::{repository, Database, DatabaseError};

/// Number of live entries after which the memory store sweeps expired ones.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Replay store database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Replay store unavailable: {0}")]
    Unavailable(String),

    #[error("Reservation TTL must be positive")]
    InvalidTtl,
}

pub trait ReplayStore: Send + Sync {
    /// Reserve `identity` within `tenant_id` for `ttl_secs`.
    ///
    /// `Ok(true)` on first use, `Ok(false)` while an earlier reservation is live.
    fn claim(&self, tenant_id: &str, identity: &str, ttl_secs: u64) -> Result<bool, ReplayError>;
}

/// Store key for a reservation. Length-prefixing the tenant keeps
/// `("a:b", "c")` and `("a", "b:c")` apart.
pub fn scope_key(tenant_id: &str, identity: &str) -> String {
    format!("{}:{tenant_id}:{identity}", tenant_id.len())
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> Result<DateTime<Utc>, ReplayError> {
    if ttl_secs == 0 {
        return Err(ReplayError::InvalidTtl);
    }
    let secs = i64::try_from(ttl_secs).map_err(|_| ReplayError::InvalidTtl)?;
    Ok(now + Duration::seconds(secs))
}

// ═══════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════

/// Process-local store for tests and single-instance development.
pub struct MemoryReplayStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryReplayStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReplayStore for MemoryReplayStore {
    fn claim(&self, tenant_id: &str, identity: &str, ttl_secs: u64) -> Result<bool, ReplayError> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl_secs)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ReplayError::Unavailable("replay map lock poisoned".into()))?;

        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, exp| *exp > now);
        }

        let key = scope_key(tenant_id, identity);
        match entries.get(&key) {
            Some(existing) if *existing > now => Ok(false),
            _ => {
                entries.insert(key, expires_at);
                Ok(true)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// SQLite store
// ═══════════════════════════════════════════════════════════

/// Durable store backed by `replay_reservations`.
pub struct SqliteReplayStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SqliteReplayStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Remove expired reservations. Optional: expired rows are already ignored.
    pub fn purge_expired(&self) -> Result<usize, ReplayError> {
        let now_ms = epoch_millis(self.clock.now());
        Ok(self
            .db
            .with_conn(|conn| repository::purge_expired_reservations(conn, now_ms))?)
    }
}

impl ReplayStore for SqliteReplayStore {
    fn claim(&self, tenant_id: &str, identity: &str, ttl_secs: u64) -> Result<bool, ReplayError> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl_secs)?;
        let key = scope_key(tenant_id, identity);
        let claimed = self.db.with_conn(|conn| {
            repository::claim_reservation(conn, &key, epoch_millis(now), epoch_millis(expires_at))
        })?;
        Ok(claimed)
    }
}
