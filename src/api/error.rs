//! API errors rendered as problem objects (`application/problem+json`).

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::api::types::RequestMeta;
use crate::audit::AuditError;
use crate::config::PROBLEM_TYPE_BASE;
use crate::device::RejectReason;
use crate::idempotency::IdempotencyError;
use crate::tokens::TokenError;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Problem body returned for every rejection.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub error_code: &'static str,
    pub correlation_id: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Idempotency-Key header is required")]
    IdempotencyKeyMissing,
    #[error("Invalid Idempotency-Key: {0}")]
    IdempotencyKeyInvalid(&'static str),
    #[error("Idempotency conflict")]
    IdempotencyConflict,
    #[error("Device proof required")]
    DeviceProofRequired,
    #[error("Device proof invalid")]
    DeviceProofInvalid,
    #[error("Device proof timestamp outside allowed window")]
    DeviceProofInvalidTime,
    #[error("Device disabled")]
    DeviceDisabled,
    #[error("Device proof replayed")]
    DeviceProofReplay,
    #[error("Token already used")]
    TokenReuse,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Audit chain state missing: {0}")]
    AuditChainStateMissing(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, Option<String>) {
        match self {
            ApiError::IdempotencyKeyMissing => (
                StatusCode::BAD_REQUEST,
                "Bad Request",
                "IDEMPOTENCY_KEY_MISSING",
                Some("Idempotency-Key header is required".into()),
            ),
            ApiError::IdempotencyKeyInvalid(reason) => (
                StatusCode::BAD_REQUEST,
                "Bad Request",
                "IDEMPOTENCY_KEY_INVALID",
                Some((*reason).to_string()),
            ),
            ApiError::IdempotencyConflict => (
                StatusCode::CONFLICT,
                "Conflict",
                "IDEMPOTENCY_CONFLICT",
                Some("Idempotency conflict".into()),
            ),
            ApiError::DeviceProofRequired => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "DEVICE_PROOF_REQUIRED",
                Some("Device proof headers are required".into()),
            ),
            ApiError::DeviceProofInvalid => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "DEVICE_PROOF_INVALID",
                Some("Device proof invalid".into()),
            ),
            ApiError::DeviceProofInvalidTime => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "DEVICE_PROOF_INVALID_TIME",
                Some("Device proof timestamp outside allowed window".into()),
            ),
            ApiError::DeviceDisabled => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "DEVICE_DISABLED",
                Some("Device disabled".into()),
            ),
            ApiError::DeviceProofReplay => (
                StatusCode::CONFLICT,
                "Conflict",
                "DEVICE_PROOF_REPLAY",
                Some("Device proof already used".into()),
            ),
            ApiError::TokenReuse => (
                StatusCode::CONFLICT,
                "Token reuse",
                "TOKEN_REUSE",
                Some("Token already used".into()),
            ),
            ApiError::TokenExpired => (
                StatusCode::BAD_REQUEST,
                "Token expired",
                "TOKEN_EXPIRED",
                Some("Token expired".into()),
            ),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "Bad Request",
                "BAD_REQUEST",
                Some(detail.clone()),
            ),
            ApiError::StoreUnavailable(detail) => {
                tracing::error!(detail, "Integrity store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable",
                    "STORE_UNAVAILABLE",
                    None,
                )
            }
            ApiError::AuditChainStateMissing(tenant_id) => {
                tracing::error!(tenant_id, "Audit chain state missing");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "AUDIT_CHAIN_STATE_MISSING",
                    None,
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "INTERNAL",
                    None,
                )
            }
        }
    }

    /// Render the problem response for a request.
    pub fn into_problem(self, meta: &RequestMeta) -> Response {
        let (status, title, error_code, detail) = self.parts();
        let problem = Problem {
            type_uri: format!("{PROBLEM_TYPE_BASE}{error_code}"),
            title,
            status: status.as_u16(),
            detail,
            instance: meta.instance.clone(),
            error_code,
            correlation_id: meta.correlation_id.clone(),
        };
        let body = serde_json::to_vec(&problem).unwrap_or_default();
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_problem(&RequestMeta::detached())
    }
}

/// An [`ApiError`] bound to the request it answers.
#[derive(Debug)]
pub struct RequestProblem {
    error: ApiError,
    meta: RequestMeta,
}

impl ApiError {
    pub fn at(self, meta: &RequestMeta) -> RequestProblem {
        RequestProblem {
            error: self,
            meta: meta.clone(),
        }
    }
}

impl IntoResponse for RequestProblem {
    fn into_response(self) -> Response {
        self.error.into_problem(&self.meta)
    }
}

impl From<RejectReason> for ApiError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::MissingHeaders => ApiError::DeviceProofRequired,
            RejectReason::InvalidTimestamp | RejectReason::TimestampOutsideAllowedWindow => {
                ApiError::DeviceProofInvalidTime
            }
            // Unknown and disabled look the same to the client.
            RejectReason::UnknownDevice | RejectReason::DeviceDisabled => ApiError::DeviceDisabled,
            RejectReason::TenantMismatch | RejectReason::InvalidSignature => {
                ApiError::DeviceProofInvalid
            }
            RejectReason::NonceReplay => ApiError::DeviceProofReplay,
            RejectReason::StoreUnavailable => {
                ApiError::StoreUnavailable("device proof stores".into())
            }
        }
    }
}

impl From<IdempotencyError> for ApiError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::KeyMissing => ApiError::IdempotencyKeyMissing,
            IdempotencyError::KeyInvalid(reason) => ApiError::IdempotencyKeyInvalid(reason),
            err if err.is_store_failure() => ApiError::StoreUnavailable(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::ChainStateMissing { tenant_id } => ApiError::AuditChainStateMissing(tenant_id),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Reused => ApiError::TokenReuse,
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::InvalidToken => ApiError::BadRequest("Invalid token".into()),
            TokenError::StoreUnavailable(e) => ApiError::StoreUnavailable(e.to_string()),
            TokenError::Audit(e) => e.into(),
            TokenError::LockPoisoned => ApiError::Internal("card ledger lock".into()),
        }
    }
}
