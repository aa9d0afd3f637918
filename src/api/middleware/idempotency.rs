//! Idempotency middleware for hot routes.
//!
//! Buffers the request body, asks the [`IdempotencyGate`](crate::idempotency::IdempotencyGate)
//! for an admission and either runs the handler once, replays the cached
//! response, or rejects with `IDEMPOTENCY_CONFLICT`.

use std::collections::BTreeMap;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::device_proof::TENANT_HEADER;
use super::{context_of, header_str, meta_of};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DeviceContext, RequestMeta};
use crate::audit::{actions, results, AuditEvent};
use crate::idempotency::{Admission, CachedResponse};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const MAX_REQUEST_BODY: usize = 64 * 1024;
const MAX_CACHED_BODY: usize = 1024 * 1024;

/// Hop-by-hop and framing headers are recomputed on replay.
const UNCACHED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection", "x-correlation-id"];

pub async fn enforce_idempotency(req: Request<Body>, next: Next) -> Response {
    let meta = meta_of(&req);
    match enforce_idempotency_inner(req, next, &meta).await {
        Ok(response) => response,
        Err(e) => e.into_problem(&meta),
    }
}

async fn enforce_idempotency_inner(
    req: Request<Body>,
    next: Next,
    meta: &RequestMeta,
) -> Result<Response, ApiError> {
    let ctx = context_of(&req)?;
    if !ctx.routes.is_hot(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let route_id = format!("{} {}", req.method(), req.uri().path());
    let device = req.extensions().get::<DeviceContext>().cloned();
    let tenant_id = device
        .as_ref()
        .map(|d| d.tenant_id.clone())
        .or_else(|| header_str(req.headers(), &[TENANT_HEADER]).map(str::to_string));
    let key = header_str(req.headers(), &[IDEMPOTENCY_KEY_HEADER]).map(str::to_string);

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|_| ApiError::BadRequest("Request body too large or unreadable".into()))?;

    match ctx
        .gate
        .admit(tenant_id.as_deref(), &route_id, key.as_deref(), &bytes)?
    {
        Admission::Replay(cached) => {
            tracing::warn!(route = %route_id, "Replaying cached idempotent response");
            audit_outcome(&ctx, device.as_ref(), actions::IDEMPOTENCY_REPLAYED, results::OK, meta)?;
            Ok(replay_response(cached, key.as_deref()))
        }
        Admission::Conflict => {
            tracing::warn!(route = %route_id, "Idempotency conflict");
            audit_outcome(
                &ctx,
                device.as_ref(),
                actions::IDEMPOTENCY_CONFLICT,
                results::REJECTED,
                meta,
            )?;
            Err(ApiError::IdempotencyConflict)
        }
        Admission::Proceed(ticket) => {
            let req = Request::from_parts(parts, Body::from(bytes));
            let response = next.run(req).await;
            let (parts, body) = response.into_parts();

            let body = match to_bytes(body, MAX_CACHED_BODY).await {
                Ok(body) => body,
                Err(e) => {
                    if let Err(abort_err) = ctx.gate.abort(&ticket) {
                        tracing::error!(error = %abort_err, "Failed to release idempotency lock");
                    }
                    return Err(ApiError::Internal(format!("response buffering failed: {e}")));
                }
            };

            let cached = CachedResponse {
                status: parts.status.as_u16(),
                headers: cacheable_headers(&parts.headers),
                body: body.to_vec(),
            };
            if let Err(e) = ctx.gate.commit(&ticket, cached) {
                tracing::error!(route = %route_id, error = %e, "Failed to store idempotent response");
            }
            Ok(Response::from_parts(parts, Body::from(body)))
        }
    }
}

/// Only a verified device names the chain; a bare `X-Tenant-Id` scopes the
/// key but is never written to.
fn audit_outcome(
    ctx: &ApiContext,
    device: Option<&DeviceContext>,
    action: &str,
    result: &str,
    meta: &RequestMeta,
) -> Result<(), ApiError> {
    let Some(device) = device else {
        return Ok(());
    };
    let event = AuditEvent::new(ctx.clock.now(), action, result)
        .with_correlation(meta.correlation_id.as_str())
        .with_device(device.device_id.as_str());
    ctx.audit.append(&device.tenant_id, &event)?;
    Ok(())
}

fn cacheable_headers(headers: &axum::http::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !UNCACHED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn replay_response(cached: CachedResponse, key: Option<&str>) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &cached.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    if let Some(value) = key.and_then(|k| HeaderValue::from_str(k).ok()) {
        headers.insert(IDEMPOTENCY_KEY_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap};

    #[test]
    fn framing_headers_are_not_cached() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        let cached = cacheable_headers(&headers);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached["content-type"], "application/json");
    }

    #[tokio::test]
    async fn replay_restores_status_and_adds_key() {
        let cached = CachedResponse {
            status: 201,
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: br#"{"ok":true}"#.to_vec(),
        };
        let response = replay_response(cached, Some("key-12345"));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[IDEMPOTENCY_KEY_HEADER], "key-12345");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }
}
