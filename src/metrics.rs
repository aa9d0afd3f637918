//! In-process security counters.
//!
//! Counters are keyed by a static reason tag and mirrored into a `tracing`
//! event so log-based pipelines see the same increments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counter family for security-relevant rejections.
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    counters: Mutex<BTreeMap<(&'static str, &'static str), u64>>,
}

impl SecurityMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `name{reason}`.
    pub fn increment(&self, name: &'static str, reason: &'static str) {
        let value = match self.counters.lock() {
            Ok(mut counters) => {
                let entry = counters.entry((name, reason)).or_insert(0);
                *entry += 1;
                *entry
            }
            Err(_) => return,
        };
        tracing::debug!(metric = name, reason, value, "security metric");
    }

    pub fn get(&self, name: &'static str, reason: &'static str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(&(name, reason)).copied())
            .unwrap_or(0)
    }

    pub fn total(&self, name: &'static str) -> u64 {
        self.counters
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|((n, _), _)| *n == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Monotonic counter for audit export gaps (`audit_gaps_count`).
#[derive(Debug, Default)]
pub struct GapCounter {
    value: AtomicU64,
}

impl GapCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

pub const DEVICE_PROOF_REJECTED: &str = "device_proof_rejected_total";
pub const IDEMPOTENCY_OUTCOME: &str = "idempotency_outcome_total";
pub const TOKEN_REUSE_BLOCKED: &str = "token_reuse_blocked_total";
