//! Device proof middleware for hot routes.
//!
//! Verifies the Ed25519 request signature, records the outcome in the
//! tenant's WORM chain and stores a [`DeviceContext`] for downstream layers.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::{context_of, header_str, meta_of};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DeviceContext, RequestMeta};
use crate::audit::{actions, results, AuditEvent};
use crate::device::{ProofHeaders, ProofRequest, Rejection};

pub const DEVICE_ID_HEADERS: &[&str] = &["x-device-id", "x-device-key"];
pub const DEVICE_PROOF_HEADERS: &[&str] = &["x-device-proof", "x-device-signature"];
pub const DEVICE_TIMESTAMP_HEADER: &str = "x-device-timestamp";
pub const DEVICE_NONCE_HEADER: &str = "x-device-nonce";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const FORWARDED_PREFIX_HEADER: &str = "x-forwarded-prefix";

pub async fn verify_device_proof(req: Request<axum::body::Body>, next: Next) -> Response {
    let meta = meta_of(&req);
    match verify_device_proof_inner(req, next, &meta).await {
        Ok(response) => response,
        Err(e) => e.into_problem(&meta),
    }
}

async fn verify_device_proof_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
    meta: &RequestMeta,
) -> Result<Response, ApiError> {
    let ctx = context_of(&req)?;
    if !ctx.routes.is_hot(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let path = signed_path(&req, ctx.trust_proxy);
    let headers = req.headers();
    let proof = ProofRequest {
        method: req.method().as_str(),
        path: &path,
        headers: ProofHeaders {
            device_id: header_str(headers, DEVICE_ID_HEADERS),
            signature: header_str(headers, DEVICE_PROOF_HEADERS),
            timestamp: header_str(headers, &[DEVICE_TIMESTAMP_HEADER]),
            nonce: header_str(headers, &[DEVICE_NONCE_HEADER]),
            tenant_id: header_str(headers, &[TENANT_HEADER]),
        },
    };

    match ctx.verifier.verify(&proof) {
        Ok(device) => {
            let event = AuditEvent::new(ctx.clock.now(), actions::DEVICE_PROOF_ACCEPTED, results::OK)
                .with_device(device.device_id.as_str())
                .with_correlation(meta.correlation_id.as_str());
            ctx.audit.append(&device.tenant_id, &event)?;
            req.extensions_mut().insert(DeviceContext {
                tenant_id: device.tenant_id,
                device_id: device.device_id,
            });
            Ok(next.run(req).await)
        }
        Err(rejection) => {
            audit_rejection(&ctx, &rejection, meta)?;
            Err(rejection.reason.into())
        }
    }
}

fn audit_rejection(ctx: &ApiContext, rejection: &Rejection, meta: &RequestMeta) -> Result<(), ApiError> {
    // Only a registry-matched device names a chain; header tenants are not trusted.
    let Some(tenant_id) = rejection.tenant_id.as_deref() else {
        tracing::info!(reason = rejection.reason.as_str(), "Device proof rejected before device match");
        return Ok(());
    };
    let mut event = AuditEvent::new(ctx.clock.now(), actions::DEVICE_PROOF_REJECTED, results::REJECTED)
        .with_correlation(meta.correlation_id.as_str());
    if let Some(device_id) = rejection.device_id.as_deref() {
        event = event.with_device(device_id);
    }
    ctx.audit.append(tenant_id, &event)?;
    Ok(())
}

/// Path covered by the signature, including the proxy mount prefix when trusted.
fn signed_path<B>(req: &Request<B>, trust_proxy: bool) -> String {
    let path = req.uri().path();
    if !trust_proxy {
        return path.to_string();
    }
    match header_str(req.headers(), &[FORWARDED_PREFIX_HEADER]) {
        Some(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            if prefix.is_empty() {
                path.to_string()
            } else if prefix.starts_with('/') {
                format!("{prefix}{path}")
            } else {
                format!("/{prefix}{path}")
            }
        }
        None => path.to_string(),
    }
}
