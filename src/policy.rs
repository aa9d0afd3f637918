//! Store-unavailability policy, chosen per integration point.
//!
//! Every call site that consults the replay or idempotency store names its
//! policy explicitly. Nothing defaults to fail-open.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Store errors reject the request.
    FailClosed,
    /// Store errors are logged at warn level and the request continues.
    FailOpen,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailClosed => "fail_closed",
            FailurePolicy::FailOpen => "fail_open",
        }
    }

    pub fn is_fail_open(&self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

/// The policy of each integration point in this crate.
pub mod points {
    use super::FailurePolicy;

    /// Device-proof nonce reservation. Must never fail open.
    pub const DEVICE_NONCE: FailurePolicy = FailurePolicy::FailClosed;
    /// Idempotency gate lookups and lock acquisition.
    pub const IDEMPOTENCY_GATE: FailurePolicy = FailurePolicy::FailClosed;
    /// Reuse check of one-time business tokens (stamp/reward JTIs).
    pub const BUSINESS_TOKEN_REUSE: FailurePolicy = FailurePolicy::FailOpen;
}
