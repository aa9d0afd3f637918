//! One-time business tokens (stamp and reward JTIs).
//!
//! A token may be redeemed once while unexpired, independently of any
//! idempotency key the request carries. Both outcomes are written to the
//! tenant's WORM chain. Store unavailability follows
//! [`points::BUSINESS_TOKEN_REUSE`](crate::policy::points::BUSINESS_TOKEN_REUSE)
//! unless another policy is given.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{actions, results, AuditError, AuditEvent, WormAuditWriter};
use crate::clock::Clock;
use crate::config::TOKEN_RESERVATION_MIN_SECS;
use crate::metrics::{SecurityMetrics, TOKEN_REUSE_BLOCKED};
use crate::policy::{points, FailurePolicy};
use crate::replay::{ReplayError, ReplayStore};

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token identifier is empty")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Token already used")]
    Reused,

    #[error("Token store unavailable: {0}")]
    StoreUnavailable(#[from] ReplayError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("Card ledger lock poisoned")]
    LockPoisoned,
}

/// Who is redeeming, for the audit record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedemptionContext<'a> {
    pub device_id: Option<&'a str>,
    pub card_id: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub jti: String,
    pub seq: i64,
    /// `false` when the store was down and the fail-open policy let it through.
    pub reuse_checked: bool,
}

pub struct OneTimeTokenRedeemer {
    store: Arc<dyn ReplayStore>,
    audit: Arc<dyn WormAuditWriter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SecurityMetrics>,
    policy: FailurePolicy,
    min_reservation_secs: u64,
}

impl OneTimeTokenRedeemer {
    pub fn new(
        store: Arc<dyn ReplayStore>,
        audit: Arc<dyn WormAuditWriter>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            metrics,
            policy: points::BUSINESS_TOKEN_REUSE,
            min_reservation_secs: TOKEN_RESERVATION_MIN_SECS,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_min_reservation(mut self, secs: u64) -> Self {
        self.min_reservation_secs = secs;
        self
    }

    /// Redeem `jti`. The reservation lasts until the token's expiry, but never
    /// less than the configured minimum: `expires_at` comes from the caller
    /// and a short one must not free the jti for reuse.
    pub fn redeem(
        &self,
        tenant_id: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
        ctx: RedemptionContext<'_>,
    ) -> Result<Redemption, TokenError> {
        if jti.trim().is_empty() {
            return Err(TokenError::InvalidToken);
        }
        let now = self.clock.now();
        let remaining = (expires_at - now).num_seconds();
        if remaining <= 0 {
            return Err(TokenError::Expired);
        }

        let ttl_secs = (remaining as u64).max(self.min_reservation_secs);

        let reuse_checked = match self.store.claim(tenant_id, &token_identity(jti), ttl_secs) {
            Ok(true) => true,
            Ok(false) => {
                self.metrics.increment(TOKEN_REUSE_BLOCKED, "reuse");
                tracing::warn!(tenant_id, jti, "One-time token reuse blocked");
                self.audit
                    .append(tenant_id, &event(now, actions::TOKEN_REUSE_BLOCKED, results::BLOCKED, jti, ctx))?;
                return Err(TokenError::Reused);
            }
            Err(err) if self.policy.is_fail_open() => {
                self.metrics.increment(TOKEN_REUSE_BLOCKED, "store_unavailable_open");
                tracing::warn!(
                    tenant_id,
                    error = %err,
                    policy = self.policy.as_str(),
                    "Token store unavailable, skipping reuse check"
                );
                false
            }
            Err(err) => {
                self.metrics.increment(TOKEN_REUSE_BLOCKED, "store_unavailable");
                return Err(err.into());
            }
        };

        let receipt = self
            .audit
            .append(tenant_id, &event(now, actions::TOKEN_REDEEMED, results::OK, jti, ctx))?;
        Ok(Redemption {
            jti: jti.to_string(),
            seq: receipt.seq,
            reuse_checked,
        })
    }
}

fn token_identity(jti: &str) -> String {
    format!("token:{jti}")
}

fn event(ts: DateTime<Utc>, action: &str, result: &str, jti: &str, ctx: RedemptionContext<'_>) -> AuditEvent {
    let mut event = AuditEvent::new(ts, action, result).with_jti(jti);
    if let Some(device_id) = ctx.device_id {
        event = event.with_device(device_id);
    }
    if let Some(card_id) = ctx.card_id {
        event = event.with_card(card_id);
    }
    if let Some(correlation_id) = ctx.correlation_id {
        event = event.with_correlation(correlation_id);
    }
    event
}

// ═══════════════════════════════════════════════════════════
// Stamp cards
// ═══════════════════════════════════════════════════════════

/// Stamp counts per (tenant, card). Stands in for the loyalty card store.
#[derive(Default)]
pub struct StampCards {
    counts: Mutex<HashMap<(String, String), u32>>,
}

impl StampCards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stamp(&self, tenant_id: &str, card_id: &str) -> Result<u32, TokenError> {
        let mut counts = self.counts.lock().map_err(|_| TokenError::LockPoisoned)?;
        let count = counts
            .entry((tenant_id.to_string(), card_id.to_string()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    pub fn stamps(&self, tenant_id: &str, card_id: &str) -> u32 {
        self.counts
            .lock()
            .ok()
            .and_then(|c| c.get(&(tenant_id.to_string(), card_id.to_string())).copied())
            .unwrap_or(0)
    }
}
