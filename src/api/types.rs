//! Shared types for the HTTP integrity layer.

use std::sync::Arc;

use axum::http::Method;

use crate::audit::{SqliteWormWriter, WormAuditWriter};
use crate::clock::Clock;
use crate::config::{GuardConfig, IDEMPOTENCY_TTL_SECS};
use crate::db::Database;
use crate::device::{DeviceProofVerifier, SqliteDeviceRegistry};
use crate::idempotency::{IdempotencyGate, SqliteIdempotencyStore};
use crate::metrics::SecurityMetrics;
use crate::policy::points;
use crate::replay::SqliteReplayStore;
use crate::tokens::{OneTimeTokenRedeemer, StampCards};

// ═══════════════════════════════════════════════════════════
// API context: shared state for router and middleware
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub verifier: Arc<DeviceProofVerifier>,
    pub gate: Arc<IdempotencyGate>,
    pub audit: Arc<dyn WormAuditWriter>,
    pub tokens: Arc<OneTimeTokenRedeemer>,
    pub cards: Arc<StampCards>,
    pub metrics: Arc<SecurityMetrics>,
    pub clock: Arc<dyn Clock>,
    pub routes: Arc<RoutePolicy>,
    pub trust_proxy: bool,
}

impl ApiContext {
    /// Wire every store to one SQLite database.
    pub fn from_database(db: Arc<Database>, clock: Arc<dyn Clock>, config: &GuardConfig) -> Self {
        let metrics = Arc::new(SecurityMetrics::new());
        let replay = Arc::new(SqliteReplayStore::new(db.clone(), clock.clone()));
        let audit: Arc<dyn WormAuditWriter> = Arc::new(SqliteWormWriter::new(db.clone()));

        let verifier = DeviceProofVerifier::new(
            Arc::new(SqliteDeviceRegistry::new(db.clone())),
            replay.clone(),
            clock.clone(),
            metrics.clone(),
            config.skew_secs,
        );
        let gate = IdempotencyGate::new(
            Arc::new(SqliteIdempotencyStore::new(db, clock.clone())),
            IDEMPOTENCY_TTL_SECS,
            points::IDEMPOTENCY_GATE,
            metrics.clone(),
        );
        let tokens = OneTimeTokenRedeemer::new(replay, audit.clone(), clock.clone(), metrics.clone());

        Self {
            verifier: Arc::new(verifier),
            gate: Arc::new(gate),
            audit,
            tokens: Arc::new(tokens),
            cards: Arc::new(StampCards::new()),
            metrics,
            clock,
            routes: Arc::new(RoutePolicy::default()),
            trust_proxy: config.trust_proxy,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Request-scoped extensions
// ═══════════════════════════════════════════════════════════

/// Identity proven by the device-proof middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub tenant_id: String,
    pub device_id: String,
}

/// Correlation id and problem `instance` for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub correlation_id: String,
    pub instance: Option<String>,
}

impl RequestMeta {
    /// Metadata for an error rendered outside any request context.
    pub fn detached() -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            instance: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Route policy
// ═══════════════════════════════════════════════════════════

/// Routes that require a device proof and an idempotency key.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    hot: Vec<(Method, String)>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            hot: vec![
                (Method::POST, "/stamps/claim".to_string()),
                (Method::POST, "/rewards/redeem".to_string()),
            ],
        }
    }
}

impl RoutePolicy {
    pub fn empty() -> Self {
        Self { hot: Vec::new() }
    }

    pub fn with_route(mut self, method: Method, path: impl Into<String>) -> Self {
        self.hot.push((method, path.into()));
        self
    }

    pub fn is_hot(&self, method: &Method, path: &str) -> bool {
        self.hot.iter().any(|(m, p)| m == method && p == path)
    }
}
