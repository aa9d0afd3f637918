//! `POST /stamps/claim`: redeem a one-time stamp token onto a card.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::{card_id, parse_body, TokenExpiry};
use crate::api::error::{ApiError, RequestProblem};
use crate::api::types::{ApiContext, DeviceContext, RequestMeta};
use crate::tokens::RedemptionContext;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub jti: String,
    pub expires_at: TokenExpiry,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub card_id: String,
    pub stamps: u32,
    pub seq: i64,
}

pub async fn claim(
    State(ctx): State<ApiContext>,
    Extension(meta): Extension<RequestMeta>,
    Extension(device): Extension<DeviceContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClaimResponse>, RequestProblem> {
    claim_inner(&ctx, &meta, &device, &headers, &body).map_err(|e| e.at(&meta))
}

fn claim_inner(
    ctx: &ApiContext,
    meta: &RequestMeta,
    device: &DeviceContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<ClaimResponse>, ApiError> {
    let request: ClaimRequest = parse_body(body)?;
    let card_id = card_id(headers);
    let expires_at = request.expires_at.to_datetime()?;

    let redemption = ctx.tokens.redeem(
        &device.tenant_id,
        &request.jti,
        expires_at,
        RedemptionContext {
            device_id: Some(&device.device_id),
            card_id: Some(&card_id),
            correlation_id: Some(&meta.correlation_id),
        },
    )?;
    let stamps = ctx.cards.add_stamp(&device.tenant_id, &card_id)?;
    tracing::info!(tenant_id = %device.tenant_id, card_id = %card_id, stamps, "Stamp claimed");

    Ok(Json(ClaimResponse {
        card_id,
        stamps,
        seq: redemption.seq,
    }))
}
