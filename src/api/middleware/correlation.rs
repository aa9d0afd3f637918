//! Correlation id assignment.
//!
//! Accepts a well-formed inbound `X-Correlation-Id`, otherwise generates one.
//! The id is echoed on every response and carried in problem bodies.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use super::header_str;
use crate::api::types::RequestMeta;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

const MAX_CORRELATION_LEN: usize = 128;

fn acceptable(id: &str) -> bool {
    id.len() <= MAX_CORRELATION_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

pub async fn assign_correlation(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = header_str(req.headers(), &[CORRELATION_HEADER])
        .filter(|id| acceptable(id))
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let instance = Some(req.uri().path().to_string());
    req.extensions_mut().insert(RequestMeta {
        correlation_id: correlation_id.clone(),
        instance,
    });

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
