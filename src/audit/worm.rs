//! Per-tenant hash-chained WORM audit log.
//!
//! `hash = sha256_hex(canonical(payload) ∥ prev_hash ∥ seq)` where `payload` is
//! `{tenant_id, ts, action, result}` plus whichever of `device_id`, `card_id`,
//! `jti`, `correlation_id` are present. `prev_hash` is `""` for `seq = 1`.
//! Timestamps are stored as RFC 3339 UTC with millisecond precision so the
//! stored string is exactly what was hashed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::AuditError;
use crate::canonical::{sha256_hex, to_canonical_string};
use crate::db::repository::{self, WormRow};
use crate::db::Database;

/// Render a timestamp the way it is hashed and stored.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An event to append. `ts` is the time of the recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub result: String,
    pub device_id: Option<String>,
    pub card_id: Option<String>,
    pub jti: Option<String>,
    pub correlation_id: Option<String>,
}

impl AuditEvent {
    pub fn new(ts: DateTime<Utc>, action: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            ts,
            action: action.into(),
            result: result.into(),
            device_id: None,
            card_id: None,
            jti: None,
            correlation_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_card(mut self, card_id: impl Into<String>) -> Self {
        self.card_id = Some(card_id.into());
        self
    }

    pub fn with_jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    fn validate(&self) -> Result<(), AuditError> {
        if self.action.trim().is_empty() {
            return Err(AuditError::InvalidEvent("action must not be empty"));
        }
        if self.result.trim().is_empty() {
            return Err(AuditError::InvalidEvent("result must not be empty"));
        }
        Ok(())
    }
}

/// Position of an appended event in its tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub seq: i64,
    pub prev_hash: String,
    pub hash: String,
}

pub trait WormAuditWriter: Send + Sync {
    /// Append `event` to the tenant's chain. Appends for one tenant are totally
    /// ordered; different tenants do not block each other's ordering.
    fn append(&self, tenant_id: &str, event: &AuditEvent) -> Result<AppendReceipt, AuditError>;
}

#[derive(Serialize)]
struct HashPayload<'a> {
    tenant_id: &'a str,
    ts: &'a str,
    action: &'a str,
    result: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jti: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

impl<'a> HashPayload<'a> {
    fn from_row(row: &'a WormRow) -> Self {
        Self {
            tenant_id: &row.tenant_id,
            ts: &row.ts,
            action: &row.action,
            result: &row.result,
            device_id: row.device_id.as_deref(),
            card_id: row.card_id.as_deref(),
            jti: row.jti.as_deref(),
            correlation_id: row.correlation_id.as_deref(),
        }
    }
}

/// Recompute the chain hash of a stored row from its own fields.
pub fn hash_row(row: &WormRow) -> Result<String, AuditError> {
    let canonical = to_canonical_string(&HashPayload::from_row(row))?;
    let mut material = canonical;
    material.push_str(&row.prev_hash);
    material.push_str(&row.seq.to_string());
    Ok(sha256_hex(material.as_bytes()))
}

/// Build the row for `event` at `seq` after `prev_hash`, hash included.
fn seal_row(tenant_id: &str, seq: i64, prev_hash: &str, event: &AuditEvent) -> Result<WormRow, AuditError> {
    let mut row = WormRow {
        tenant_id: tenant_id.to_string(),
        seq,
        ts: format_ts(event.ts),
        action: event.action.clone(),
        result: event.result.clone(),
        device_id: event.device_id.clone(),
        card_id: event.card_id.clone(),
        jti: event.jti.clone(),
        correlation_id: event.correlation_id.clone(),
        prev_hash: prev_hash.to_string(),
        hash: String::new(),
    };
    row.hash = hash_row(&row)?;
    Ok(row)
}

// ═══════════════════════════════════════════════════════════
// Chain verification
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// Stored hash differs from the recomputed one.
    HashMismatch { seq: i64 },
    /// `prev_hash` does not equal the previous row's hash (or the anchor).
    BrokenLink { seq: i64 },
    /// Sequence numbers are not contiguous.
    SeqGap { expected: i64, found: i64 },
    /// Rows from more than one tenant were passed.
    MixedTenants { seq: i64 },
}

/// Verify a contiguous slice of one tenant's chain.
///
/// `anchor_prev_hash` is the expected `prev_hash` of the first row: `Some("")`
/// for a chain starting at seq 1, the previous export's end hash for a later
/// slice, or `None` to trust the first row's link (pruned chains).
pub fn verify_chain(rows: &[WormRow], anchor_prev_hash: Option<&str>) -> Result<(), ChainViolation> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    if first.seq == 1 && !first.prev_hash.is_empty() {
        return Err(ChainViolation::BrokenLink { seq: 1 });
    }
    if let Some(anchor) = anchor_prev_hash {
        if first.prev_hash != anchor {
            return Err(ChainViolation::BrokenLink { seq: first.seq });
        }
    }

    let mut previous: Option<&WormRow> = None;
    for row in rows {
        if row.tenant_id != first.tenant_id {
            return Err(ChainViolation::MixedTenants { seq: row.seq });
        }
        if let Some(prev) = previous {
            if row.seq != prev.seq + 1 {
                return Err(ChainViolation::SeqGap {
                    expected: prev.seq + 1,
                    found: row.seq,
                });
            }
            if row.prev_hash != prev.hash {
                return Err(ChainViolation::BrokenLink { seq: row.seq });
            }
        }
        match hash_row(row) {
            Ok(hash) if hash == row.hash => {}
            _ => return Err(ChainViolation::HashMismatch { seq: row.seq }),
        }
        previous = Some(row);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// SQLite writer
// ═══════════════════════════════════════════════════════════

/// Appends inside `BEGIN IMMEDIATE`, so the database write lock serializes
/// the read of the chain tail with the insert and the tail update.
pub struct SqliteWormWriter {
    db: Arc<Database>,
}

impl SqliteWormWriter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Rows of a tenant's chain in `from_seq..=to_seq`.
    pub fn rows(&self, tenant_id: &str, from_seq: i64, to_seq: i64) -> Result<Vec<WormRow>, AuditError> {
        Ok(self
            .db
            .with_conn(|conn| repository::list_worm_rows(conn, tenant_id, from_seq, to_seq))?)
    }
}

impl WormAuditWriter for SqliteWormWriter {
    fn append(&self, tenant_id: &str, event: &AuditEvent) -> Result<AppendReceipt, AuditError> {
        event.validate()?;
        let row = self.db.with_immediate_tx(|tx| -> Result<WormRow, AuditError> {
            repository::ensure_chain_state(tx, tenant_id)?;
            let state = repository::get_chain_state(tx, tenant_id)?.ok_or_else(|| {
                AuditError::ChainStateMissing {
                    tenant_id: tenant_id.to_string(),
                }
            })?;
            let row = seal_row(tenant_id, state.last_seq + 1, &state.last_hash, event)?;
            repository::insert_worm_row(tx, &row)?;
            if !repository::advance_chain_state(tx, tenant_id, row.seq, &row.hash, &row.ts)? {
                return Err(AuditError::ChainStateMissing {
                    tenant_id: tenant_id.to_string(),
                });
            }
            Ok(row)
        })?;

        tracing::info!(
            tenant_id,
            seq = row.seq,
            action = %row.action,
            result = %row.result,
            "WORM audit event appended"
        );
        Ok(AppendReceipt {
            seq: row.seq,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory writer
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct TenantChain {
    rows: Vec<WormRow>,
}

impl TenantChain {
    fn tail(&self) -> (i64, &str) {
        self.rows
            .last()
            .map(|r| (r.seq, r.hash.as_str()))
            .unwrap_or((0, ""))
    }
}

/// Single-process writer: one mutex per tenant chain. Only valid when this
/// process is the sole writer of the log.
#[derive(Default)]
pub struct MemoryWormWriter {
    chains: Mutex<HashMap<String, Arc<Mutex<TenantChain>>>>,
}

impl MemoryWormWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self, tenant_id: &str) -> Result<Arc<Mutex<TenantChain>>, AuditError> {
        let mut chains = self.chains.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(chains.entry(tenant_id.to_string()).or_default().clone())
    }

    /// Snapshot of a tenant's chain.
    pub fn rows(&self, tenant_id: &str) -> Result<Vec<WormRow>, AuditError> {
        let chain = self.chain(tenant_id)?;
        let chain = chain.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(chain.rows.clone())
    }
}

impl WormAuditWriter for MemoryWormWriter {
    fn append(&self, tenant_id: &str, event: &AuditEvent) -> Result<AppendReceipt, AuditError> {
        event.validate()?;
        let chain = self.chain(tenant_id)?;
        let mut chain = chain.lock().map_err(|_| AuditError::LockPoisoned)?;
        let (last_seq, last_hash) = chain.tail();
        let row = seal_row(tenant_id, last_seq + 1, last_hash, event)?;
        let receipt = AppendReceipt {
            seq: row.seq,
            prev_hash: row.prev_hash.clone(),
            hash: row.hash.clone(),
        };
        chain.rows.push(row);
        tracing::debug!(tenant_id, seq = receipt.seq, "WORM audit event appended (memory)");
        Ok(receipt)
    }
}
