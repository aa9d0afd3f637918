//! Tamper-evident audit trail.
//!
//! - `worm`: per-tenant hash-chained append-only log.
//! - `export`: signed, immutable export bundles of chain ranges.
//! - `storage`: object storage targets for bundles.
//! - `monitor`: export freshness (gap) checks and alerting.
//! - `verify`: offline verification of an exported bundle.
//! - `retention`: pruning of rows already covered by a successful export.

pub mod export;
pub mod monitor;
pub mod retention;
pub mod signer;
pub mod storage;
pub mod verify;
pub mod worm;

pub use worm::{
    verify_chain, AppendReceipt, AuditEvent, ChainViolation, MemoryWormWriter, SqliteWormWriter,
    WormAuditWriter,
};

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Audit chain state missing for tenant {tenant_id}")]
    ChainStateMissing { tenant_id: String },

    #[error("Audit event could not be canonicalized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid audit event: {0}")]
    InvalidEvent(&'static str),

    #[error("Audit writer lock poisoned")]
    LockPoisoned,
}

/// Well-known audit actions. The set is open; any non-empty string is accepted.
pub mod actions {
    pub const DEVICE_PROOF_ACCEPTED: &str = "device_proof.accepted";
    pub const DEVICE_PROOF_REJECTED: &str = "device_proof.rejected";
    pub const IDEMPOTENCY_REPLAYED: &str = "idempotency.replayed";
    pub const IDEMPOTENCY_CONFLICT: &str = "idempotency.conflict";
    pub const TOKEN_REDEEMED: &str = "token.redeemed";
    pub const TOKEN_REUSE_BLOCKED: &str = "token.reuse_blocked";
}

/// Well-known results.
pub mod results {
    pub const OK: &str = "ok";
    pub const REJECTED: &str = "rejected";
    pub const BLOCKED: &str = "blocked";
}
