//! Request-integrity middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Correlation: assigns the correlation id and problem `instance`
//! 2. Device proof: authenticates hot routes, audits the outcome
//! 3. Idempotency: dedups hot routes, replays cached results

pub mod correlation;
pub mod device_proof;
pub mod idempotency;

use axum::http::HeaderMap;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, RequestMeta};

/// First non-blank value among `names`.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

pub(crate) fn context_of<B>(req: &axum::http::Request<B>) -> Result<ApiContext, ApiError> {
    req.extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))
}

pub(crate) fn meta_of<B>(req: &axum::http::Request<B>) -> RequestMeta {
    req.extensions()
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_else(RequestMeta::detached)
}
