//! Device-proof verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//! headers present → timestamp parses and is within the skew window → device
//! known, enabled and owned by the claimed tenant → signature valid → nonce
//! not seen before. The nonce is only reserved once the signature holds, so an
//! unauthenticated caller cannot burn a device's nonces.
//!
//! Verification never panics or propagates an error past this boundary: every
//! failure is a [`Rejection`] with a reason. Each rejection increments
//! `device_proof_rejected_total{reason}` and is logged before it is returned.

use std::sync::Arc;

use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;

use super::registry::{DeviceAlgorithm, DeviceRecord, DeviceRegistry};
use super::decode_base64_lenient;
use crate::clock::Clock;
use crate::config::DEVICE_NONCE_TTL_SECS;
use crate::metrics::{SecurityMetrics, DEVICE_PROOF_REJECTED};
use crate::policy::points;
use crate::replay::ReplayStore;

/// Timestamps above this are read as epoch milliseconds rather than seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MissingHeaders,
    InvalidTimestamp,
    TimestampOutsideAllowedWindow,
    UnknownDevice,
    DeviceDisabled,
    TenantMismatch,
    InvalidSignature,
    NonceReplay,
    StoreUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingHeaders => "MISSING_HEADERS",
            RejectReason::InvalidTimestamp => "INVALID_TIMESTAMP",
            RejectReason::TimestampOutsideAllowedWindow => "TIMESTAMP_OUTSIDE_ALLOWED_WINDOW",
            RejectReason::UnknownDevice => "UNKNOWN_DEVICE",
            RejectReason::DeviceDisabled => "DEVICE_DISABLED",
            RejectReason::TenantMismatch => "TENANT_MISMATCH",
            RejectReason::InvalidSignature => "INVALID_SIGNATURE",
            RejectReason::NonceReplay => "NONCE_REPLAY",
            RejectReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

/// Raw proof headers as received. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProofHeaders<'a> {
    pub device_id: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub tenant_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProofRequest<'a> {
    pub method: &'a str,
    /// Path as signed by the device: no query string, proxy prefix already applied.
    pub path: &'a str,
    pub headers: ProofHeaders<'a>,
}

/// Authenticated identity bound into the request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDevice {
    pub tenant_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Owning tenant from the device registry. Set only once the device
    /// record was found, so it is safe for audit attribution.
    pub tenant_id: Option<String>,
    /// Tenant named by the request header. Unauthenticated, logged only.
    pub claimed_tenant_id: Option<String>,
    pub device_id: Option<String>,
}

/// `METHOD|PATH|TIMESTAMP|NONCE`, method upper-cased, timestamp verbatim.
pub fn canonical_message(method: &str, path: &str, timestamp: &str, nonce: &str) -> String {
    format!("{}|{}|{}|{}", method.to_ascii_uppercase(), path, timestamp, nonce)
}

/// Epoch seconds from a header value; millisecond values are accepted too.
fn parse_timestamp_secs(raw: &str) -> Option<i64> {
    let value: i64 = raw.trim().parse().ok()?;
    if value.abs() > MILLIS_THRESHOLD {
        Some(value.div_euclid(1000))
    } else {
        Some(value)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Ed25519 verification where any decoding failure counts as a bad signature.
fn signature_valid(record: &DeviceRecord, message: &[u8], signature_b64: &str) -> bool {
    match record.algorithm {
        DeviceAlgorithm::Ed25519 => {}
    }
    let Some(key_bytes) = decode_base64_lenient(&record.public_key) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Some(sig_bytes) = decode_base64_lenient(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify_strict(message, &signature).is_ok()
}

pub struct DeviceProofVerifier {
    registry: Arc<dyn DeviceRegistry>,
    replay: Arc<dyn ReplayStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SecurityMetrics>,
    skew_secs: i64,
}

impl DeviceProofVerifier {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        replay: Arc<dyn ReplayStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SecurityMetrics>,
        skew_secs: i64,
    ) -> Self {
        Self {
            registry,
            replay,
            clock,
            metrics,
            skew_secs: skew_secs.max(1),
        }
    }

    pub fn skew_secs(&self) -> i64 {
        self.skew_secs
    }

    /// Nonces must outlive every timestamp that could still pass the window.
    fn nonce_ttl_secs(&self) -> u64 {
        let window = u64::try_from(self.skew_secs.saturating_mul(2)).unwrap_or(u64::MAX);
        window.max(DEVICE_NONCE_TTL_SECS)
    }

    /// Whether `device_id` belongs to a tenant other than `tenant`. Only used to
    /// sharpen the internal rejection reason.
    fn registered_elsewhere(&self, tenant: &str, device_id: &str) -> bool {
        matches!(
            self.registry.find_by_key(device_id),
            Ok(Some(other)) if other.tenant_id != tenant
        )
    }

    pub fn verify(&self, request: &ProofRequest<'_>) -> Result<VerifiedDevice, Rejection> {
        let result = self.verify_inner(request);
        if let Err(rejection) = &result {
            self.metrics
                .increment(DEVICE_PROOF_REJECTED, rejection.reason.as_str());
            tracing::warn!(
                reason = rejection.reason.as_str(),
                tenant_id = rejection.tenant_id.as_deref().unwrap_or("-"),
                claimed_tenant_id = rejection.claimed_tenant_id.as_deref().unwrap_or("-"),
                device_id = rejection.device_id.as_deref().unwrap_or("-"),
                method = request.method,
                path = request.path,
                "Device proof rejected"
            );
        }
        result
    }

    fn verify_inner(&self, request: &ProofRequest<'_>) -> Result<VerifiedDevice, Rejection> {
        let headers = &request.headers;
        let claimed_tenant = non_empty(headers.tenant_id);
        let reject = |reason: RejectReason, tenant: Option<&str>, device: Option<&str>| Rejection {
            reason,
            tenant_id: tenant.map(str::to_string),
            claimed_tenant_id: claimed_tenant.map(str::to_string),
            device_id: device.map(str::to_string),
        };

        let device_id = non_empty(headers.device_id);
        let (Some(device_id), Some(signature), Some(timestamp), Some(nonce)) = (
            device_id,
            non_empty(headers.signature),
            non_empty(headers.timestamp),
            non_empty(headers.nonce),
        ) else {
            return Err(reject(RejectReason::MissingHeaders, None, device_id));
        };

        let Some(ts_secs) = parse_timestamp_secs(timestamp) else {
            return Err(reject(RejectReason::InvalidTimestamp, None, Some(device_id)));
        };
        let now_secs = self.clock.now().timestamp();
        if (now_secs - ts_secs).abs() > self.skew_secs {
            return Err(reject(
                RejectReason::TimestampOutsideAllowedWindow,
                None,
                Some(device_id),
            ));
        }

        let lookup = match claimed_tenant {
            Some(tenant) => self.registry.find_by_id(tenant, device_id),
            None => self.registry.find_by_key(device_id),
        };
        let record = match lookup {
            Ok(Some(record)) => record,
            Ok(None) => {
                let reason = match claimed_tenant {
                    Some(tenant) if self.registered_elsewhere(tenant, device_id) => {
                        RejectReason::TenantMismatch
                    }
                    _ => RejectReason::UnknownDevice,
                };
                return Err(reject(reason, None, Some(device_id)));
            }
            Err(err) => {
                tracing::error!(error = %err, "Device registry lookup failed");
                return Err(reject(RejectReason::StoreUnavailable, None, Some(device_id)));
            }
        };
        if !record.enabled {
            return Err(reject(
                RejectReason::DeviceDisabled,
                Some(record.tenant_id.as_str()),
                Some(device_id),
            ));
        }
        if let Some(tenant) = claimed_tenant {
            if tenant != record.tenant_id {
                return Err(reject(
                    RejectReason::TenantMismatch,
                    Some(record.tenant_id.as_str()),
                    Some(device_id),
                ));
            }
        }

        let message = canonical_message(request.method, request.path, timestamp, nonce);
        if !signature_valid(&record, message.as_bytes(), signature) {
            return Err(reject(
                RejectReason::InvalidSignature,
                Some(record.tenant_id.as_str()),
                Some(device_id),
            ));
        }

        let identity = format!("device-proof:{}:{}", record.device_id, nonce);
        match self.replay.claim(&record.tenant_id, &identity, self.nonce_ttl_secs()) {
            Ok(true) => {}
            Ok(false) => {
                return Err(reject(RejectReason::NonceReplay, Some(record.tenant_id.as_str()), Some(device_id)));
            }
            Err(err) => {
                // The device nonce never fails open.
                debug_assert!(!points::DEVICE_NONCE.is_fail_open());
                tracing::error!(
                    error = %err,
                    policy = points::DEVICE_NONCE.as_str(),
                    "Replay store unavailable during device nonce check"
                );
                return Err(reject(
                    RejectReason::StoreUnavailable,
                    Some(record.tenant_id.as_str()),
                    Some(device_id),
                ));
            }
        }

        tracing::debug!(tenant_id = %record.tenant_id, device_id = %record.device_id, "Device proof verified");
        Ok(VerifiedDevice {
            tenant_id: record.tenant_id,
            device_id: record.device_id,
        })
    }
}
