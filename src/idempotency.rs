//! Idempotency gate: at most one execution per (tenant, route, key, body).
//!
//! `admit` resolves a request to one of three outcomes:
//! - `Proceed`: this caller holds the execution lock and must later `commit`
//!   the response or `abort`.
//! - `Replay`: a completed response is cached and is returned verbatim.
//! - `Conflict`: another execution is in flight, or the key was already used
//!   with a different body.
//!
//! Locks and cached results both expire after the configured TTL. A crashed
//! executor therefore blocks retries of the same request until the lock expires.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::canonical::{canonical_json, sha256_hex};
use crate::clock::{epoch_millis, Clock};
use crate::config::{IDEMPOTENCY_KEY_MAX_LEN, IDEMPOTENCY_KEY_MIN_LEN};
use crate::db::{repository, Database, DatabaseError};
use crate::metrics::{SecurityMetrics, IDEMPOTENCY_OUTCOME};
use crate::policy::FailurePolicy;

#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("Idempotency-Key header is required")]
    KeyMissing,

    #[error("Idempotency-Key is malformed: {0}")]
    KeyInvalid(&'static str),

    #[error("Idempotency store database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    #[error("Cached response could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl IdempotencyError {
    /// Whether the error came from the backing store rather than the request.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            IdempotencyError::Database(_)
                | IdempotencyError::Unavailable(_)
                | IdempotencyError::Encoding(_)
        )
    }
}

/// A response as cached for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

// ═══════════════════════════════════════════════════════════
// Store interface
// ═══════════════════════════════════════════════════════════

pub trait IdempotencyStore: Send + Sync {
    /// Cached result for `scoped_key`, if one was committed and has not expired.
    fn get_result(&self, scoped_key: &str) -> Result<Option<CachedResponse>, IdempotencyError>;

    /// Atomically take the lock. `false` if any unexpired entry exists.
    fn acquire_lock(&self, scoped_key: &str, ttl_secs: u64) -> Result<bool, IdempotencyError>;

    /// Replace the lock with a completed result.
    fn set_result(
        &self,
        scoped_key: &str,
        result: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), IdempotencyError>;

    /// Drop a lock that produced no result. Completed entries are untouched.
    fn release_lock(&self, scoped_key: &str) -> Result<(), IdempotencyError>;

    /// Atomically bind `binding_key` to `body_hash`. `false` if an unexpired
    /// binding holds a different hash.
    fn bind_body(
        &self,
        binding_key: &str,
        body_hash: &str,
        ttl_secs: u64,
    ) -> Result<bool, IdempotencyError>;
}

/// Upper bound on any record lifetime (ten years).
const MAX_TTL_SECS: i64 = 10 * 366 * 24 * 60 * 60;

/// Map size after which the memory store sweeps expired entries and bindings.
const SWEEP_THRESHOLD: usize = 1024;

fn ttl_after(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(ttl_secs).unwrap_or(MAX_TTL_SECS).min(MAX_TTL_SECS);
    now + Duration::seconds(secs)
}

// ═══════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum EntryState {
    Locked,
    Completed(CachedResponse),
}

#[derive(Debug, Clone)]
struct Entry {
    state: EntryState,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    bindings: HashMap<String, (String, DateTime<Utc>)>,
}

impl MemoryState {
    fn sweep(&mut self, now: DateTime<Utc>) {
        if self.entries.len() > SWEEP_THRESHOLD {
            self.entries.retain(|_, entry| entry.expires_at > now);
        }
        if self.bindings.len() > SWEEP_THRESHOLD {
            self.bindings.retain(|_, (_, expires_at)| *expires_at > now);
        }
    }
}

/// Process-local store for tests and single-instance development.
pub struct MemoryIdempotencyStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryIdempotencyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, IdempotencyError> {
        self.state
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("idempotency map lock poisoned".into()))
    }

    /// Live plus not-yet-swept entries and bindings.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.entries.len() + s.bindings.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn get_result(&self, scoped_key: &str) -> Result<Option<CachedResponse>, IdempotencyError> {
        let now = self.clock.now();
        let state = self.lock()?;
        Ok(match state.entries.get(scoped_key) {
            Some(Entry {
                state: EntryState::Completed(result),
                expires_at,
            }) if *expires_at > now => Some(result.clone()),
            _ => None,
        })
    }

    fn acquire_lock(&self, scoped_key: &str, ttl_secs: u64) -> Result<bool, IdempotencyError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.sweep(now);
        if let Some(entry) = state.entries.get(scoped_key) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }
        state.entries.insert(
            scoped_key.to_string(),
            Entry {
                state: EntryState::Locked,
                expires_at: ttl_after(now, ttl_secs),
            },
        );
        Ok(true)
    }

    fn set_result(
        &self,
        scoped_key: &str,
        result: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), IdempotencyError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.entries.insert(
            scoped_key.to_string(),
            Entry {
                state: EntryState::Completed(result.clone()),
                expires_at: ttl_after(now, ttl_secs),
            },
        );
        Ok(())
    }

    fn release_lock(&self, scoped_key: &str) -> Result<(), IdempotencyError> {
        let mut state = self.lock()?;
        if matches!(
            state.entries.get(scoped_key),
            Some(Entry {
                state: EntryState::Locked,
                ..
            })
        ) {
            state.entries.remove(scoped_key);
        }
        Ok(())
    }

    fn bind_body(
        &self,
        binding_key: &str,
        body_hash: &str,
        ttl_secs: u64,
    ) -> Result<bool, IdempotencyError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.sweep(now);
        match state.bindings.get(binding_key) {
            Some((hash, expires_at)) if *expires_at > now => Ok(hash == body_hash),
            _ => {
                state.bindings.insert(
                    binding_key.to_string(),
                    (body_hash.to_string(), ttl_after(now, ttl_secs)),
                );
                Ok(true)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// SQLite store
// ═══════════════════════════════════════════════════════════

/// Durable store backed by `idempotency_entries` and `idempotency_bindings`.
pub struct SqliteIdempotencyStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SqliteIdempotencyStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn purge_expired(&self) -> Result<usize, IdempotencyError> {
        let now_ms = epoch_millis(self.clock.now());
        Ok(self
            .db
            .with_conn(|conn| repository::purge_expired_idempotency(conn, now_ms))?)
    }
}

impl IdempotencyStore for SqliteIdempotencyStore {
    fn get_result(&self, scoped_key: &str) -> Result<Option<CachedResponse>, IdempotencyError> {
        let now_ms = epoch_millis(self.clock.now());
        let row = self
            .db
            .with_conn(|conn| repository::get_completed_result(conn, scoped_key, now_ms))?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(CachedResponse {
                status: row.status,
                headers: serde_json::from_str(&row.headers_json)?,
                body: row.body,
            })),
        }
    }

    fn acquire_lock(&self, scoped_key: &str, ttl_secs: u64) -> Result<bool, IdempotencyError> {
        let now = self.clock.now();
        let expires_at = epoch_millis(ttl_after(now, ttl_secs));
        Ok(self.db.with_conn(|conn| {
            repository::acquire_idempotency_lock(conn, scoped_key, epoch_millis(now), expires_at)
        })?)
    }

    fn set_result(
        &self,
        scoped_key: &str,
        result: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), IdempotencyError> {
        let row = repository::StoredResultRow {
            status: result.status,
            headers_json: serde_json::to_string(&result.headers)?,
            body: result.body.clone(),
        };
        let expires_at = epoch_millis(ttl_after(self.clock.now(), ttl_secs));
        self.db
            .with_conn(|conn| repository::store_completed_result(conn, scoped_key, &row, expires_at))?;
        Ok(())
    }

    fn release_lock(&self, scoped_key: &str) -> Result<(), IdempotencyError> {
        self.db
            .with_conn(|conn| repository::release_idempotency_lock(conn, scoped_key))?;
        Ok(())
    }

    fn bind_body(
        &self,
        binding_key: &str,
        body_hash: &str,
        ttl_secs: u64,
    ) -> Result<bool, IdempotencyError> {
        let now = self.clock.now();
        let expires_at = epoch_millis(ttl_after(now, ttl_secs));
        Ok(self.db.with_conn(|conn| {
            repository::bind_request_body(conn, binding_key, body_hash, epoch_millis(now), expires_at)
        })?)
    }
}

// ═══════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════

/// Validate a client-supplied key: 8..=128 visible ASCII characters.
pub fn validate_key(raw: Option<&str>) -> Result<&str, IdempotencyError> {
    let key = raw.ok_or(IdempotencyError::KeyMissing)?;
    if key.trim().is_empty() {
        return Err(IdempotencyError::KeyMissing);
    }
    if key.len() < IDEMPOTENCY_KEY_MIN_LEN || key.len() > IDEMPOTENCY_KEY_MAX_LEN {
        return Err(IdempotencyError::KeyInvalid("length must be between 8 and 128"));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(IdempotencyError::KeyInvalid("must be printable ASCII without spaces"));
    }
    Ok(key)
}

/// Tenant placeholder for unauthenticated routes.
const NO_TENANT: &str = "-";

/// `idem:` + SHA-256 over the canonical encoding of (tenant, route, body hash, key).
pub fn scoped_key(tenant_id: Option<&str>, route_id: &str, body_hash: &str, key: &str) -> String {
    let material = json!([tenant_id.unwrap_or(NO_TENANT), route_id, body_hash, key]);
    format!("idem:{}", sha256_hex(canonical_json(&material).as_bytes()))
}

/// Key under which the first body hash seen for (tenant, route, key) is pinned.
pub fn binding_key(tenant_id: Option<&str>, route_id: &str, key: &str) -> String {
    let material = json!([tenant_id.unwrap_or(NO_TENANT), route_id, key]);
    format!("idem-bind:{}", sha256_hex(canonical_json(&material).as_bytes()))
}

// ═══════════════════════════════════════════════════════════
// Gate
// ═══════════════════════════════════════════════════════════

/// Held by the single executor between `admit` and `commit`/`abort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyTicket {
    pub key: String,
    scoped_key: String,
    /// `false` when the store failed and the gate admitted under fail-open.
    tracked: bool,
}

impl IdempotencyTicket {
    pub fn scoped_key(&self) -> &str {
        &self.scoped_key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed(IdempotencyTicket),
    Replay(CachedResponse),
    Conflict,
}

pub struct IdempotencyGate {
    store: Arc<dyn IdempotencyStore>,
    ttl_secs: u64,
    policy: FailurePolicy,
    metrics: Arc<SecurityMetrics>,
}

impl IdempotencyGate {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        ttl_secs: u64,
        policy: FailurePolicy,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            store,
            ttl_secs,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Resolve a request. Key validation errors are always returned; store
    /// failures are returned under fail-closed and admitted untracked under fail-open.
    pub fn admit(
        &self,
        tenant_id: Option<&str>,
        route_id: &str,
        idempotency_key: Option<&str>,
        raw_body: &[u8],
    ) -> Result<Admission, IdempotencyError> {
        let key = match validate_key(idempotency_key) {
            Ok(key) => key,
            Err(err) => {
                self.metrics.increment(IDEMPOTENCY_OUTCOME, "key_invalid");
                return Err(err);
            }
        };
        let body_hash = sha256_hex(raw_body);
        let scoped = scoped_key(tenant_id, route_id, &body_hash, key);

        match self.resolve(tenant_id, route_id, key, &body_hash, &scoped) {
            Ok(admission) => {
                let outcome = match &admission {
                    Admission::Proceed(_) => "proceed",
                    Admission::Replay(_) => "replay",
                    Admission::Conflict => "conflict",
                };
                self.metrics.increment(IDEMPOTENCY_OUTCOME, outcome);
                Ok(admission)
            }
            Err(err) if err.is_store_failure() && self.policy.is_fail_open() => {
                tracing::warn!(
                    route = route_id,
                    error = %err,
                    policy = self.policy.as_str(),
                    "Idempotency store unavailable, admitting request untracked"
                );
                self.metrics.increment(IDEMPOTENCY_OUTCOME, "store_unavailable_open");
                Ok(Admission::Proceed(IdempotencyTicket {
                    key: key.to_string(),
                    scoped_key: scoped,
                    tracked: false,
                }))
            }
            Err(err) => {
                self.metrics.increment(IDEMPOTENCY_OUTCOME, "store_unavailable");
                Err(err)
            }
        }
    }

    fn resolve(
        &self,
        tenant_id: Option<&str>,
        route_id: &str,
        key: &str,
        body_hash: &str,
        scoped: &str,
    ) -> Result<Admission, IdempotencyError> {
        let binding = binding_key(tenant_id, route_id, key);
        if !self.store.bind_body(&binding, body_hash, self.ttl_secs)? {
            tracing::warn!(route = route_id, "Idempotency key reused with a different body");
            return Ok(Admission::Conflict);
        }

        if let Some(cached) = self.store.get_result(scoped)? {
            return Ok(Admission::Replay(cached));
        }

        if self.store.acquire_lock(scoped, self.ttl_secs)? {
            return Ok(Admission::Proceed(IdempotencyTicket {
                key: key.to_string(),
                scoped_key: scoped.to_string(),
                tracked: true,
            }));
        }

        // The holder may have committed between the lookup and the lock attempt.
        match self.store.get_result(scoped)? {
            Some(cached) => Ok(Admission::Replay(cached)),
            None => Ok(Admission::Conflict),
        }
    }

    /// Cache the executor's response. Statuses >= 500 are not cached; the lock
    /// is released instead so the same request can be retried.
    pub fn commit(&self, ticket: &IdempotencyTicket, result: CachedResponse) -> Result<(), IdempotencyError> {
        if !ticket.tracked {
            return Ok(());
        }
        if result.status >= 500 {
            return self.store.release_lock(&ticket.scoped_key);
        }
        self.store.set_result(&ticket.scoped_key, &result, self.ttl_secs)
    }

    /// Release the lock without caching, after the business operation failed.
    pub fn abort(&self, ticket: &IdempotencyTicket) -> Result<(), IdempotencyError> {
        if !ticket.tracked {
            return Ok(());
        }
        self.store.release_lock(&ticket.scoped_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::policy::points;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    const KEY: &str = "key-0001-abcdef";

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    fn stores(clock: &FixedClock) -> Vec<(&'static str, Arc<dyn IdempotencyStore>)> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        vec![
            (
                "memory",
                Arc::new(MemoryIdempotencyStore::new(Arc::new(clock.clone()))) as Arc<dyn IdempotencyStore>,
            ),
            (
                "sqlite",
                Arc::new(SqliteIdempotencyStore::new(db, Arc::new(clock.clone()))) as Arc<dyn IdempotencyStore>,
            ),
        ]
    }

    fn gate(store: Arc<dyn IdempotencyStore>) -> IdempotencyGate {
        IdempotencyGate::new(
            store,
            crate::config::IDEMPOTENCY_TTL_SECS,
            points::IDEMPOTENCY_GATE,
            Arc::new(SecurityMetrics::new()),
        )
    }

    fn response(status: u16, body: &str) -> CachedResponse {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        CachedResponse {
            status,
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn memory_store_sweeps_expired_entries_and_bindings() {
        let clock = clock();
        let store = MemoryIdempotencyStore::new(Arc::new(clock.clone()));
        for i in 0..=SWEEP_THRESHOLD {
            assert!(store.acquire_lock(&format!("k{i}"), 10).unwrap());
            assert!(store.bind_body(&format!("b{i}"), "h", 10).unwrap());
        }
        clock.advance(Duration::seconds(11));
        assert!(store.acquire_lock("fresh", 10).unwrap());
        assert!(store.bind_body("fresh", "h", 10).unwrap());
        assert_eq!(store.len(), 2);
    }

    fn expect_ticket(admission: Admission) -> IdempotencyTicket {
        match admission {
            Admission::Proceed(ticket) => ticket,
            other => panic!("expected Proceed, got {other:?}"),
        }
    }

    struct FailingStore;

    impl IdempotencyStore for FailingStore {
        fn get_result(&self, _: &str) -> Result<Option<CachedResponse>, IdempotencyError> {
            Err(IdempotencyError::Unavailable("down".into()))
        }
        fn acquire_lock(&self, _: &str, _: u64) -> Result<bool, IdempotencyError> {
            Err(IdempotencyError::Unavailable("down".into()))
        }
        fn set_result(&self, _: &str, _: &CachedResponse, _: u64) -> Result<(), IdempotencyError> {
            Err(IdempotencyError::Unavailable("down".into()))
        }
        fn release_lock(&self, _: &str) -> Result<(), IdempotencyError> {
            Err(IdempotencyError::Unavailable("down".into()))
        }
        fn bind_body(&self, _: &str, _: &str, _: u64) -> Result<bool, IdempotencyError> {
            Err(IdempotencyError::Unavailable("down".into()))
        }
    }

    #[test]
    fn key_validation() {
        assert!(matches!(validate_key(None), Err(IdempotencyError::KeyMissing)));
        assert!(matches!(validate_key(Some("   ")), Err(IdempotencyError::KeyMissing)));
        assert!(matches!(validate_key(Some("short")), Err(IdempotencyError::KeyInvalid(_))));
        assert!(matches!(
            validate_key(Some(&"k".repeat(129))),
            Err(IdempotencyError::KeyInvalid(_))
        ));
        assert!(matches!(
            validate_key(Some("has a space in it")),
            Err(IdempotencyError::KeyInvalid(_))
        ));
        assert_eq!(validate_key(Some(KEY)).unwrap(), KEY);
    }

    #[test]
    fn scoped_key_binds_every_component() {
        let base = scoped_key(Some("t1"), "POST /stamps/claim", "h", KEY);
        assert_ne!(base, scoped_key(Some("t2"), "POST /stamps/claim", "h", KEY));
        assert_ne!(base, scoped_key(Some("t1"), "POST /rewards/redeem", "h", KEY));
        assert_ne!(base, scoped_key(Some("t1"), "POST /stamps/claim", "h2", KEY));
        assert_ne!(base, scoped_key(None, "POST /stamps/claim", "h", KEY));
        assert!(base.starts_with("idem:"));
    }

    #[test]
    fn commit_then_replay_verbatim() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let ticket = expect_ticket(gate.admit(Some("t1"), "POST /stamps/claim", Some(KEY), b"{}").unwrap());
            gate.commit(&ticket, response(201, r#"{"id":1}"#)).unwrap();

            let again = gate.admit(Some("t1"), "POST /stamps/claim", Some(KEY), b"{}").unwrap();
            assert_eq!(again, Admission::Replay(response(201, r#"{"id":1}"#)), "{name}");
        }
    }

    #[test]
    fn in_flight_duplicate_conflicts() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let _ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap());
            assert_eq!(
                gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap(),
                Admission::Conflict,
                "{name}"
            );
        }
    }

    #[test]
    fn different_body_conflicts_even_after_abort() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"first").unwrap());
            assert_eq!(
                gate.admit(Some("t1"), "r", Some(KEY), b"second").unwrap(),
                Admission::Conflict,
                "{name}"
            );
            gate.abort(&ticket).unwrap();
            assert_eq!(
                gate.admit(Some("t1"), "r", Some(KEY), b"second").unwrap(),
                Admission::Conflict,
                "{name}"
            );
        }
    }

    #[test]
    fn different_body_does_not_disturb_first_result() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"first").unwrap());
            gate.commit(&ticket, response(200, "ok")).unwrap();
            assert_eq!(gate.admit(Some("t1"), "r", Some(KEY), b"second").unwrap(), Admission::Conflict);
            assert_eq!(
                gate.admit(Some("t1"), "r", Some(KEY), b"first").unwrap(),
                Admission::Replay(response(200, "ok")),
                "{name}"
            );
        }
    }

    #[test]
    fn abort_allows_same_request_retry() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap());
            gate.abort(&ticket).unwrap();
            assert!(
                matches!(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap(), Admission::Proceed(_)),
                "{name}"
            );
        }
    }

    #[test]
    fn server_errors_are_not_cached() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap());
            gate.commit(&ticket, response(503, "busy")).unwrap();
            assert!(
                matches!(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap(), Admission::Proceed(_)),
                "{name}"
            );
        }
    }

    #[test]
    fn expired_lock_becomes_claimable() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let _crashed = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap());
            clock.advance(Duration::seconds(crate::config::IDEMPOTENCY_TTL_SECS as i64));
            assert!(
                matches!(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap(), Admission::Proceed(_)),
                "{name}"
            );
        }
    }

    #[test]
    fn concurrent_identical_requests_execute_once() {
        let clock = clock();
        for (name, store) in stores(&clock) {
            let gate = gate(store);
            let executions = AtomicUsize::new(0);
            let others = AtomicUsize::new(0);
            let barrier = Barrier::new(12);
            std::thread::scope(|s| {
                for _ in 0..12 {
                    s.spawn(|| {
                        barrier.wait();
                        match gate.admit(Some("t1"), "POST /stamps/claim", Some(KEY), b"{}").unwrap() {
                            Admission::Proceed(ticket) => {
                                executions.fetch_add(1, Ordering::SeqCst);
                                gate.commit(&ticket, response(200, "done")).unwrap();
                            }
                            Admission::Replay(_) | Admission::Conflict => {
                                others.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            });
            assert_eq!(executions.load(Ordering::SeqCst), 1, "{name}");
            assert_eq!(others.load(Ordering::SeqCst), 11, "{name}");

            // Once settled, every further duplicate replays the same response.
            for _ in 0..3 {
                assert_eq!(
                    gate.admit(Some("t1"), "POST /stamps/claim", Some(KEY), b"{}").unwrap(),
                    Admission::Replay(response(200, "done")),
                    "{name}"
                );
            }
        }
    }

    #[test]
    fn fail_closed_surfaces_store_errors() {
        let gate = gate(Arc::new(FailingStore));
        let err = gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap_err();
        assert!(err.is_store_failure());
    }

    #[test]
    fn fail_open_admits_untracked() {
        let metrics = Arc::new(SecurityMetrics::new());
        let gate = IdempotencyGate::new(
            Arc::new(FailingStore),
            60,
            FailurePolicy::FailOpen,
            metrics.clone(),
        );
        let ticket = expect_ticket(gate.admit(Some("t1"), "r", Some(KEY), b"a").unwrap());
        gate.commit(&ticket, response(200, "ok")).unwrap();
        assert_eq!(metrics.get(IDEMPOTENCY_OUTCOME, "store_unavailable_open"), 1);
    }

    #[test]
    fn invalid_key_never_touches_store() {
        let gate = gate(Arc::new(FailingStore));
        assert!(matches!(
            gate.admit(Some("t1"), "r", Some("short"), b"a"),
            Err(IdempotencyError::KeyInvalid(_))
        ));
    }
}
